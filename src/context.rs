use log::{debug, trace, warn};

use crate::crc32::CRC_SEED;
use crate::error::{Error, Result};
use crate::header;
use crate::interface::Interface;
use crate::msg::{
    DevId, IdType, Msg, MsgType, ParseType, TxOptions, MAX_OUTER_FRAME_LEN, MAX_PAYLOAD_LEN,
    MSG_BUF_LEN,
};
use crate::port::{CommsPort, RxState, PORT_TIMEOUT_MS};
use crate::varint;

/// Per-endpoint parser callback. Drives the payload codec against the
/// application's variables; application state uses interior mutability.
pub type ParserFn<A> = fn(app: &A, msg: &mut Msg);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

// Servers and clients share one record; dispatch selects by role.
struct Endpoint<A> {
    address: u32,
    role: Role,
    parser: ParserFn<A>,
}

/// Protocol engine instance: comms ports, registered endpoints, and the
/// receive/dispatch/send machinery.
///
/// One task per port feeds bytes in with [`stream_rx_char`](Self::stream_rx_char);
/// dispatch and any automatic response happen synchronously inside that call.
pub struct Context<'a, 'b, T, A> {
    /// Identifier string for logging.
    pub name: String,
    /// Hardware/application interface.
    pub hw_if: &'a T,
    /// Application state handed to every parser callback.
    pub app: &'b A,
    endpoints: Vec<Endpoint<A>>,
    ports: Vec<CommsPort>,
    build_legacy: Option<ParserFn<A>>,
    parse_legacy: Option<ParserFn<A>>,
}

impl<'a, 'b, T, A> Context<'a, 'b, T, A>
where
    T: Interface,
{
    pub fn new(name: String, hw_if: &'a T, app: &'b A, num_ports: usize) -> Self {
        let mut ports = Vec::with_capacity(num_ports);
        for _ in 0..num_ports {
            ports.push(CommsPort::new());
        }
        Context {
            name,
            hw_if,
            app,
            endpoints: Vec::new(),
            ports,
            build_legacy: None,
            parse_legacy: None,
        }
    }

    /// Register a server endpoint, returning its handle.
    pub fn init_server(&mut self, address: DevId, id_type: IdType, parser: ParserFn<A>) -> usize {
        self.init_endpoint(Role::Server, address, id_type, parser)
    }

    /// Register a client endpoint, returning its handle.
    pub fn init_client(&mut self, address: DevId, id_type: IdType, parser: ParserFn<A>) -> usize {
        self.init_endpoint(Role::Client, address, id_type, parser)
    }

    fn init_endpoint(
        &mut self,
        role: Role,
        address: DevId,
        id_type: IdType,
        parser: ParserFn<A>,
    ) -> usize {
        let address = match id_type {
            IdType::Device => address as u32,
            // CRC32 of the 96 bit MCU UID, upper three bytes combined with
            // the device id in the low byte. The 8th extendible bits are
            // forced on (and the last one off) so the address always
            // serializes as 4 bytes.
            IdType::Uid => {
                let crc = self
                    .hw_if
                    .accumulate_crc32(CRC_SEED, &self.hw_if.mcu_uid());
                ((address as u32 | (crc << 8)) | 0x0080_8080) & 0x7fff_ffff
            }
        };
        self.endpoints.push(Endpoint {
            address,
            role,
            parser,
        });
        self.endpoints.len() - 1
    }

    /// Address assigned to a registered endpoint.
    pub fn endpoint_address(&self, handle: usize) -> u32 {
        self.endpoints[handle].address
    }

    /// Install the build/parse hooks for the legacy `QB` header format.
    /// Without them, legacy frames are counted and dropped, and legacy
    /// transmission fails with [`Error::LegacyUnsupported`].
    pub fn set_legacy_hooks(&mut self, build: ParserFn<A>, parse: ParserFn<A>) {
        self.build_legacy = Some(build);
        self.parse_legacy = Some(parse);
    }

    /// Port state and diagnostic counters.
    pub fn port(&self, port: u8) -> &CommsPort {
        &self.ports[port as usize]
    }

    // Called whenever a 'Q' is received at the appropriate time to start
    // receiving a packet.
    fn init_packet_start_on_q(&mut self, idx: usize) {
        let now = self.hw_if.ticks_ms();
        let port = &mut self.ports[idx];
        port.rx_cntr = 1;
        port.rx_msg.buf[0] = b'Q';
        port.rx_msg.cursor = 1;
        port.rx_msg_start_time = now;
        port.len_approved = false;
    }

    #[cfg(feature = "packet-timeout")]
    fn check_packet_timeout(&mut self, idx: usize) {
        let port = &self.ports[idx];
        if !port.len_approved {
            return;
        }
        let rate = self.hw_if.port_ms_per_bit_x4096(idx as u8) as u64;
        let budget = (((port.rx_msg.header.msg_length as u64 + 7) * rate) >> 12) as u32
            + 2
            + self.hw_if.port_latency_ms(idx as u8);
        let elapsed = self
            .hw_if
            .ticks_ms()
            .wrapping_sub(port.rx_msg_start_time);
        if budget < elapsed {
            self.ports[idx].rx_state = RxState::StartWait;
        }
    }

    /// Feed one character from a serial stream into the receive state
    /// machine. Returns `true` if a full message was received in this call.
    pub fn stream_rx_char(&mut self, port: u8, byte: u8) -> bool {
        let idx = port as usize;

        #[cfg(feature = "packet-timeout")]
        self.check_packet_timeout(idx);

        match self.ports[idx].rx_state {
            RxState::StartWait => {
                if byte == b'Q' {
                    self.init_packet_start_on_q(idx);
                    self.ports[idx].rx_state = RxState::GetProtoVer;
                } else {
                    self.ports[idx].non_q_cnt += 1;
                }
            }

            RxState::GetProtoVer => {
                self.ports[idx].push_rx_byte(byte);
                match byte {
                    b'X' => {
                        let p = &mut self.ports[idx];
                        p.rx_msg.legacy_header = false;
                        p.rx_state = RxState::GetQxLen0;
                    }
                    b'B' => {
                        let p = &mut self.ports[idx];
                        p.rx_msg.legacy_header = true;
                        p.rx_state = RxState::GetQbLen0;
                    }
                    // 'QQX...' starts a packet at the second Q; accept it as
                    // a fresh start and stay in this state.
                    b'Q' => self.init_packet_start_on_q(idx),
                    _ => self.ports[idx].rx_state = RxState::StartWait,
                }
            }

            RxState::GetQxLen0 => {
                let p = &mut self.ports[idx];
                p.push_rx_byte(byte);
                if byte & 0x80 != 0 {
                    // Bit 7 extension: a second length byte follows.
                    p.rx_msg.header.msg_length = (byte & 0x7f) as u16;
                    p.rx_state = RxState::GetQxLen1;
                } else {
                    p.rx_msg.header.msg_length = byte as u16;
                    p.rx_msg.att_start = p.rx_msg.cursor;
                    p.running_checksum = 0;
                    p.rx_state = RxState::GetData;
                }
            }

            RxState::GetQxLen1 => {
                let p = &mut self.ports[idx];
                p.push_rx_byte(byte);
                p.rx_msg.att_start = p.rx_msg.cursor;
                if byte & 0x80 != 0 {
                    // 21 bit lengths are not supported.
                    p.len_reject_cnt += 1;
                    p.rx_state = RxState::StartWait;
                } else {
                    p.rx_msg.header.msg_length |= ((byte & 0x7f) as u16) << 7;
                    p.running_checksum = 0;
                    p.rx_state = RxState::GetData;
                    if (MAX_PAYLOAD_LEN as u16) < p.rx_msg.header.msg_length {
                        p.len_reject_cnt += 1;
                        p.rx_state = RxState::StartWait;
                    }
                }
            }

            RxState::GetQbLen0 => {
                let p = &mut self.ports[idx];
                p.push_rx_byte(byte);
                p.rx_msg.header.msg_length = (byte as u16) << 8;
                p.rx_state = RxState::GetQbLen1;
            }

            RxState::GetQbLen1 => {
                let p = &mut self.ports[idx];
                p.push_rx_byte(byte);
                p.rx_msg.att_start = p.rx_msg.cursor;
                p.rx_msg.header.msg_length |= byte as u16;
                p.running_checksum = 0;
                p.rx_state = RxState::GetData;
                if (MAX_PAYLOAD_LEN as u16) < p.rx_msg.header.msg_length {
                    p.len_reject_cnt += 1;
                    p.rx_state = RxState::StartWait;
                }
            }

            RxState::GetData => {
                let p = &mut self.ports[idx];
                if !p.push_rx_byte(byte) {
                    // Declared length ran past this build's buffer.
                    p.len_reject_cnt += 1;
                    p.rx_state = RxState::StartWait;
                    return false;
                }
                if !p.len_approved && byte & 0x80 == 0 {
                    // The attribute id is complete: verify the declared
                    // length against this attribute's allowance, once.
                    let mut pos = p.rx_msg.att_start;
                    let attrib = varint::get(&p.rx_msg.buf, &mut pos);
                    let limit = self
                        .hw_if
                        .packet_len_lookup(attrib)
                        .min((MSG_BUF_LEN - MAX_OUTER_FRAME_LEN) as u32);
                    if limit >= p.rx_msg.header.msg_length as u32 {
                        p.len_approved = true;
                    } else {
                        debug!(
                            target: self.name.as_str(),
                            "length {} rejected for attribute {}",
                            p.rx_msg.header.msg_length,
                            attrib
                        );
                        p.len_reject_cnt += 1;
                        p.rx_state = RxState::StartWait;
                        return false;
                    }
                }
                p.running_checksum = p.running_checksum.wrapping_add(byte);
                if p.rx_msg.header.msg_length as usize
                    <= p.rx_cntr as usize - p.rx_msg.att_start
                {
                    p.rx_state = RxState::GetChksum;
                }
            }

            RxState::GetChksum => {
                let now = self.hw_if.ticks_ms();
                let p = &mut self.ports[idx];
                p.push_rx_byte(byte);
                p.rx_state = RxState::StartWait;
                p.rx_msg.port = port;
                if p.running_checksum.wrapping_add(byte) == 0xff {
                    p.timeout_cntr = 0;
                    p.last_rx_msg_time = now;
                    p.connected = true;
                    p.rx_msg.msg_len = p.rx_cntr;
                    // Frame boundary: hand the message off and leave the
                    // port a fresh zeroed one.
                    let mut msg = std::mem::replace(&mut p.rx_msg, Msg::new());
                    if let Err(err) = self.rx_msg(&mut msg) {
                        warn!(target: self.name.as_str(), "rx message dropped: {}", err);
                        let p = &mut self.ports[idx];
                        match err {
                            Error::Crc32Fail => p.crc32_fail_cnt += 1,
                            Error::LegacyUnsupported => p.legacy_unsupported_cnt += 1,
                            _ => {}
                        }
                    }
                    return true;
                } else {
                    warn!(target: self.name.as_str(), "checksum error, drop this frame");
                    p.chksum_fail_cnt += 1;
                }
            }
        }
        false
    }

    /// Call periodically to time out the connected flag.
    pub fn connection_status_update(&mut self, port: u8) {
        let now = self.hw_if.ticks_ms();
        let p = &mut self.ports[port as usize];
        p.timeout_cntr = now.wrapping_sub(p.last_rx_msg_time);
        if p.timeout_cntr > PORT_TIMEOUT_MS {
            p.connected = false;
        }
    }

    // Process one received message and respond if necessary.
    fn rx_msg(&self, msg: &mut Msg) -> Result<()> {
        msg.start = 0;
        msg.cursor = 0;
        msg.att_not_handled = false;

        if msg.legacy_header {
            let parse = self.parse_legacy.ok_or(Error::LegacyUnsupported)?;
            msg.cursor = msg.att_start;
            parse(self.app, msg);
        } else {
            header::parse(msg)?;
        }

        if msg.header.add_crc32 {
            let len = msg.msg_len as usize;
            let crc_at = len.checked_sub(5).ok_or(Error::Crc32Fail)?;
            // CRC runs from the start of frame through the byte before the
            // CRC field; the field itself is little-endian.
            let crc = self.hw_if.accumulate_crc32(CRC_SEED, &msg.buf[..crc_at]);
            let wire = u32::from_le_bytes([
                msg.buf[crc_at],
                msg.buf[crc_at + 1],
                msg.buf[crc_at + 2],
                msg.buf[crc_at + 3],
            ]);
            if crc != wire {
                return Err(Error::Crc32Fail);
            }
        }

        trace!(
            target: self.name.as_str(),
            "incoming frame: attrib={}, type={:?}, len={}",
            msg.header.attrib,
            msg.header.msg_type,
            msg.header.msg_length
        );

        let target = msg.header.target_addr;
        let broadcast = target == DevId::Broadcast as u32;
        let addressed = self.endpoints.iter().any(|e| e.address == target);

        if addressed || broadcast {
            match msg.header.msg_type {
                MsgType::Read => self.srv_rx_read(msg),
                MsgType::WriteAbs | MsgType::WriteRel => self.srv_rx_write(msg),
                MsgType::CurVal => self.cli_rx_cur_val(msg),
            }
        } else {
            // Foreign target: let the application proxy it to other ports.
            self.hw_if.forward(msg);
        }

        Ok(())
    }

    fn response_options(rx_msg: &Msg) -> TxOptions {
        TxOptions {
            legacy: rx_msg.legacy_header,
            use_crc32: rx_msg.header.add_crc32,
            ff_ext: rx_msg.header.ff_ext,
            remove_addr_fields: rx_msg.header.remove_addr_fields,
            // No need for request fields in a response.
            remove_req_fields: true,
            // Reverse target.
            target_addr: rx_msg.header.source_addr,
            ..TxOptions::default()
        }
    }

    // Server receives a read: no data payload, reply with the current value.
    fn srv_rx_read(&self, rx_msg: &mut Msg) {
        let target = rx_msg.header.target_addr;
        for endpoint in self.endpoints.iter().filter(|e| {
            e.role == Role::Server
                && (target == e.address || target == DevId::Broadcast as u32)
        }) {
            let options = Self::response_options(rx_msg);
            if let Err(err) = self.send_packet(
                endpoint,
                MsgType::CurVal,
                rx_msg.header.attrib,
                rx_msg.port,
                options,
            ) {
                debug!(target: self.name.as_str(), "read response not sent: {}", err);
            }
        }
    }

    // Server receives a write: unpack into the application, then echo the
    // current value back unless the parser suppressed the response.
    fn srv_rx_write(&self, rx_msg: &mut Msg) {
        rx_msg.parse_type = if rx_msg.header.msg_type == MsgType::WriteRel {
            ParseType::WriteRelRecv
        } else {
            ParseType::WriteAbsRecv
        };

        let target = rx_msg.header.target_addr;
        for endpoint in self.endpoints.iter().filter(|e| {
            e.role == Role::Server
                && (target == e.address || target == DevId::Broadcast as u32)
        }) {
            rx_msg.cursor = rx_msg.payload_start;
            (endpoint.parser)(self.app, rx_msg);

            if !rx_msg.disable_std_response {
                let options = Self::response_options(rx_msg);
                if let Err(err) = self.send_packet(
                    endpoint,
                    MsgType::CurVal,
                    rx_msg.header.attrib,
                    rx_msg.port,
                    options,
                ) {
                    debug!(target: self.name.as_str(), "write response not sent: {}", err);
                }
            }
        }
    }

    // Client receives a current value: unpack into the application.
    fn cli_rx_cur_val(&self, rx_msg: &mut Msg) {
        rx_msg.parse_type = ParseType::CurValRecv;

        let target = rx_msg.header.target_addr;
        for endpoint in self.endpoints.iter().filter(|e| {
            e.role == Role::Client
                && (target == e.address || target == DevId::Broadcast as u32)
        }) {
            rx_msg.cursor = rx_msg.payload_start;
            (endpoint.parser)(self.app, rx_msg);
        }
    }

    /// Send a current value message from a server endpoint, for asynchronous
    /// use by the application such as periodic charting.
    pub fn send_srv_cur_val(
        &self,
        server: usize,
        attrib: u32,
        port: u8,
        options: TxOptions,
    ) -> Result<()> {
        self.send_packet(&self.endpoints[server], MsgType::CurVal, attrib, port, options)
    }

    /// Send a read request from a client endpoint.
    pub fn send_cli_read(
        &self,
        client: usize,
        attrib: u32,
        port: u8,
        mut options: TxOptions,
    ) -> Result<()> {
        options.trans_req_addr = DevId::Broadcast;
        self.send_packet(&self.endpoints[client], MsgType::Read, attrib, port, options)
    }

    /// Send an absolute write from a client endpoint.
    pub fn send_cli_write_abs(
        &self,
        client: usize,
        attrib: u32,
        port: u8,
        options: TxOptions,
    ) -> Result<()> {
        self.send_packet(&self.endpoints[client], MsgType::WriteAbs, attrib, port, options)
    }

    /// Send a relative write from a client endpoint.
    pub fn send_cli_write_rel(
        &self,
        client: usize,
        attrib: u32,
        port: u8,
        options: TxOptions,
    ) -> Result<()> {
        self.send_packet(&self.endpoints[client], MsgType::WriteRel, attrib, port, options)
    }

    /// Send a control write carrying the transmit/response request
    /// addressing from `options`.
    pub fn send_cli_control(
        &self,
        client: usize,
        attrib: u32,
        port: u8,
        options: TxOptions,
    ) -> Result<()> {
        self.send_cli_write_abs(client, attrib, port, options)
    }

    fn send_packet(
        &self,
        endpoint: &Endpoint<A>,
        msg_type: MsgType,
        attrib: u32,
        port: u8,
        options: TxOptions,
    ) -> Result<()> {
        let mut msg = Msg::new();
        msg.port = port;
        msg.legacy_header = options.legacy;
        msg.header.attrib = attrib;
        msg.header.msg_type = msg_type;
        msg.header.source_addr = endpoint.address;
        msg.header.target_addr = options.target_addr;
        msg.header.trans_req_addr = options.trans_req_addr as u32;
        msg.header.resp_req_addr = options.resp_req_addr as u32;
        msg.header.ff_ext = options.ff_ext;
        msg.header.add_crc32 = options.use_crc32;
        msg.header.remove_addr_fields = options.remove_addr_fields;
        msg.header.remove_req_fields = options.remove_req_fields;

        self.tx_msg_setup(&mut msg)?;

        // Read messages have no data; everything else runs the endpoint's
        // parser to pack the payload.
        if msg_type != MsgType::Read {
            msg.parse_type = match msg_type {
                MsgType::WriteAbs => ParseType::WriteAbsSend,
                MsgType::WriteRel => ParseType::WriteRelSend,
                _ => ParseType::CurValSend,
            };
            (endpoint.parser)(self.app, &mut msg);
        }

        self.tx_msg_finish(&mut msg)
    }

    // Create the message header and prepare the buffer for payload parsing.
    fn tx_msg_setup(&self, msg: &mut Msg) -> Result<()> {
        // Reserve room for the longest start: 'Q' + 'X' + LEN0 + LEN1.
        msg.att_start = 4;
        msg.cursor = 4;

        if msg.legacy_header {
            let build = self.build_legacy.ok_or(Error::LegacyUnsupported)?;
            build(self.app, msg);
        } else {
            header::build(msg);
        }
        Ok(())
    }

    // After the payload has been packed, finish building the message and
    // hand it to the application for transmission.
    fn tx_msg_finish(&self, msg: &mut Msg) -> Result<()> {
        if msg.att_not_handled {
            return Err(Error::AttNotHandled(msg.header.attrib));
        }

        // Message length field: attribute field to end of payload.
        msg.header.msg_length = (msg.cursor - msg.att_start) as u16;

        // Two byte length field for legacy frames, and for bodies near the
        // one byte limit so padding and CRC still fit.
        let use_2byte_len = msg.legacy_header || msg.header.msg_length >= 100;
        msg.start = if use_2byte_len { 0 } else { 1 };
        msg.msg_len = (msg.cursor - msg.start) as u16;

        // The padding, CRC and outer checksum must fit in the buffer.
        let tail = if msg.header.add_crc32 {
            (4 - msg.msg_len as usize % 4) + 4 + 1
        } else {
            1
        };
        if msg.cursor + tail > MSG_BUF_LEN {
            return Err(Error::MsgLengthInvalid(msg.header.msg_length));
        }

        if msg.header.add_crc32 {
            // Zero-pad to 32 bit alignment from the start of frame; the CRC
            // itself keeps the total aligned.
            let pad = 4 - msg.msg_len as usize % 4;
            for _ in 0..pad {
                msg.write_u8(0);
            }
            msg.msg_len += pad as u16;
            msg.header.msg_length = (msg.cursor - msg.att_start) as u16 + 4;
        }

        let len = msg.header.msg_length;
        if msg.legacy_header {
            msg.buf[0] = b'Q';
            msg.buf[1] = b'B';
            msg.buf[2] = (len >> 8) as u8;
            msg.buf[3] = len as u8;
        } else if use_2byte_len {
            msg.buf[0] = b'Q';
            msg.buf[1] = b'X';
            msg.buf[2] = (len & 0x7f) as u8 | 0x80;
            msg.buf[3] = ((len >> 7) & 0x7f) as u8;
        } else {
            msg.buf[1] = b'Q';
            msg.buf[2] = b'X';
            msg.buf[3] = (len & 0x7f) as u8;
        }

        if msg.header.add_crc32 {
            let crc = self.hw_if.accumulate_crc32(
                CRC_SEED,
                &msg.buf[msg.start..msg.start + msg.msg_len as usize],
            );
            for byte in crc.to_le_bytes() {
                msg.write_u8(byte);
            }
            msg.msg_len = (msg.cursor - msg.start) as u16;
        }

        // Outer checksum over the attribute field through the end, chosen so
        // the receive-side sum comes to 0xFF.
        let sum = msg.buf[msg.att_start..msg.att_start + msg.header.msg_length as usize]
            .iter()
            .fold(0u8, |acc, &byte| acc.wrapping_add(byte));
        msg.write_u8(0xff - sum);
        msg.msg_len += 1;

        debug!(
            target: self.name.as_str(),
            "send {:?}: attrib={}, wire len={}",
            msg.header.msg_type,
            msg.header.attrib,
            msg.msg_len
        );
        self.hw_if.send_to_port(msg);
        Ok(())
    }
}
