use crate::header::Header;
use crate::varint;

/// Frame overhead outside the checksummed region: Q + X + LEN0 + LEN1 + CHKSUM.
pub const MAX_OUTER_FRAME_LEN: usize = 5;
/// Protocol ceiling for a message length. Never raise this without reworking
/// the timeout system.
pub const MAX_PAYLOAD_LEN: usize = 2048;
/// Maximum message length unless an attribute is approved for more by
/// [`Interface::packet_len_lookup`](crate::Interface::packet_len_lookup).
pub const MAX_PAYLOAD_LEN_DEFAULT: usize = 64;

#[cfg(feature = "extended-length-packets")]
pub const MSG_BUF_LEN: usize = MAX_PAYLOAD_LEN + MAX_OUTER_FRAME_LEN;
#[cfg(not(feature = "extended-length-packets"))]
pub const MSG_BUF_LEN: usize = MAX_PAYLOAD_LEN_DEFAULT + MAX_OUTER_FRAME_LEN;

/// Message types as seen on the wire (low nibble of option byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Current value of the attribute.
    CurVal = 0,
    /// Read request; a current value message is the response.
    Read = 1,
    /// Write absolute values to the application variables.
    WriteAbs = 2,
    /// Write relative values to the application variables.
    WriteRel = 3,
}

impl MsgType {
    pub fn from_nibble(nibble: u8) -> Option<MsgType> {
        match nibble & 0xf {
            0 => Some(MsgType::CurVal),
            1 => Some(MsgType::Read),
            2 => Some(MsgType::WriteAbs),
            3 => Some(MsgType::WriteRel),
            _ => None,
        }
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }
}

/// Which way the parser callback moves data between the message buffer and
/// the application variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseType {
    /// Pack data from application variables into a send buffer.
    CurValSend,
    /// Unpack data from an rx buffer into application variables.
    CurValRecv,
    /// Pack absolute values into a send buffer.
    WriteAbsSend,
    /// Write absolute values from an rx buffer into application variables.
    WriteAbsRecv,
    /// Pack relative values into a send buffer.
    WriteRelSend,
    /// Apply relative values from an rx buffer to application variables.
    WriteRelRecv,
}

/// Device ids, 7 bits, used in source/target addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DevId {
    Broadcast = 0,
    WedgeLensController, // This placement is due to legacy reasons
    Gimbal,
    GimbalIntFiz,
    InternalGui,
    MobileConfigGui,
    EngineeringConfigGui,
    MoviController,
    LensController,
    PodController1,
    PodController2,
    PodController3,
    PodController4,
    ExtFizCam1,
    ExtFizCam2,
    ExtFiz3d,
    FlightControllerCore1,
    FlightControllerCore2,
    GpsCompassUnit,
    Flogger,
    MoviApiController,
    PilotFocusController,
    PilotIrisZoomController,
    UniversalMotorDriveGeneric,
    MotorDriveTester,
    UniversalMotorDriveMiniF7,
}

/// How an endpoint address is formed from a device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    /// Device type only.
    Device,
    /// Device type combined with 21 bits of the MCU UID CRC.
    Uid,
}

/// Options for TX messages, passed to the send functions.
#[derive(Debug, Clone, Copy)]
pub struct TxOptions {
    /// Freefly protocol extension.
    pub ff_ext: bool,
    /// Use CRC32 for higher data integrity.
    pub use_crc32: bool,
    /// Drop the source/target fields for speed optimized transmission.
    pub remove_addr_fields: bool,
    /// Drop the transmit-request/response-request fields.
    pub remove_req_fields: bool,
    pub target_addr: u32,
    pub trans_req_addr: DevId,
    pub resp_req_addr: DevId,
    pub legacy: bool,
}

impl Default for TxOptions {
    fn default() -> Self {
        TxOptions {
            remove_addr_fields: false,
            remove_req_fields: false,
            resp_req_addr: DevId::Broadcast,
            target_addr: DevId::Broadcast as u32,
            trans_req_addr: DevId::Broadcast,
            ff_ext: false,
            use_crc32: false,
            legacy: false,
        }
    }
}

/// A single in-flight message.
///
/// One lives inside each comms port for reception; the send functions build
/// one per transmission. The buffer holds the full frame; the offsets mark
/// the start of frame, start of the attribute field, start of the payload,
/// and the running cursor used by the header and payload codecs.
pub struct Msg {
    pub parse_type: ParseType,
    pub header: Header,
    pub(crate) disable_std_response: bool,
    pub(crate) att_not_handled: bool,
    pub(crate) legacy_header: bool,
    pub(crate) port: u8,
    pub(crate) buf: [u8; MSG_BUF_LEN],
    /// Length of the message, number of bytes on the wire.
    pub(crate) msg_len: u16,
    pub(crate) start: usize,
    pub(crate) att_start: usize,
    pub(crate) payload_start: usize,
    pub(crate) cursor: usize,
}

impl Msg {
    pub fn new() -> Self {
        Msg {
            parse_type: ParseType::CurValSend,
            header: Header::default(),
            disable_std_response: false,
            att_not_handled: false,
            legacy_header: false,
            port: 0,
            buf: [0; MSG_BUF_LEN],
            msg_len: 0,
            start: 0,
            att_start: 0,
            payload_start: 0,
            cursor: 0,
        }
    }

    /// Comms port the message was received from or will be transmitted on.
    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy_header
    }

    /// Disable the automatic current-value response to a read or write.
    ///
    /// Call from within a receive parser callback to take over responding.
    pub fn disable_default_response(&mut self) {
        self.disable_std_response = true;
    }

    /// Flag the attribute as not handled by this device. The message is
    /// dropped without data and without a standard response.
    pub fn set_att_not_handled(&mut self) {
        self.att_not_handled = true;
    }

    pub fn att_not_handled(&self) -> bool {
        self.att_not_handled
    }

    /// The complete frame as it goes on the wire. Only meaningful once the
    /// message has been finalized or received.
    pub fn frame_bytes(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.msg_len as usize]
    }

    // Raw buffer access for legacy header hooks. Reads past the buffer
    // yield zeros and writes past it are dropped; the cursor still advances.

    /// Read one byte at the cursor and advance.
    pub fn read_u8(&mut self) -> u8 {
        let byte = self.buf.get(self.cursor).copied().unwrap_or(0);
        self.cursor += 1;
        byte
    }

    /// Write one byte at the cursor and advance.
    pub fn write_u8(&mut self, byte: u8) {
        if let Some(slot) = self.buf.get_mut(self.cursor) {
            *slot = byte;
        }
        self.cursor += 1;
    }

    /// Read an extensible 7 bit value at the cursor.
    pub fn get_extd_val(&mut self) -> u32 {
        varint::get(&self.buf, &mut self.cursor)
    }

    /// Append an extensible 7 bit value at the cursor.
    pub fn put_extd_val(&mut self, val: u32) {
        varint::put(&mut self.buf, &mut self.cursor, val);
    }

    /// Record the current cursor as the start of the payload. The standard
    /// header codec does this on its own; legacy hooks must call it after
    /// building or parsing their header.
    pub fn mark_payload_start(&mut self) {
        self.payload_start = self.cursor;
    }
}

impl Default for Msg {
    fn default() -> Self {
        Msg::new()
    }
}
