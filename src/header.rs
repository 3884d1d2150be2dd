//! Message frame header codec.
//!
//! Layout after the length field: attribute id (extensible value), option
//! byte 0, optional option byte 1, optional source/target addresses,
//! optional transmit-request/response-request addresses, optional two byte
//! Freefly extension.

use crate::error::{Error, Result};
use crate::msg::{DevId, Msg, MsgType};

// Option byte 0: [b7 opt1][b6 no addr][b5 no req][b4 ff ext][b3:b0 type]
const OPT0_FF_EXT_SHIFT: u8 = 4;
const OPT0_REMOVE_REQ_SHIFT: u8 = 5;
const OPT0_REMOVE_ADDR_SHIFT: u8 = 6;
const OPT0_OPTION_BYTE1_SHIFT: u8 = 7;

// Option byte 1: [b0 crc32], other bits reserved zero.
const OPT1_CRC32_SHIFT: u8 = 0;

/// All of the data contained in the header as seen on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// Message length field: attribute field to end of payload, in bytes.
    pub msg_length: u16,
    /// Attribute number.
    pub attrib: u32,
    pub msg_type: MsgType,
    /// Option byte 1 follows option byte 0.
    pub add_option_byte1: bool,
    /// Pad the frame to 32 bit alignment and append a CRC32.
    pub add_crc32: bool,
    pub ff_ext: bool,
    pub ff_ext_r0: u8,
    pub ff_ext_r1: u8,
    pub remove_addr_fields: bool,
    pub remove_req_fields: bool,
    pub source_addr: u32,
    pub target_addr: u32,
    pub trans_req_addr: u32,
    pub resp_req_addr: u32,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            msg_length: 0,
            attrib: 0,
            msg_type: MsgType::CurVal,
            add_option_byte1: false,
            add_crc32: false,
            ff_ext: false,
            ff_ext_r0: 0,
            ff_ext_r1: 0,
            remove_addr_fields: false,
            remove_req_fields: false,
            source_addr: DevId::Broadcast as u32,
            target_addr: DevId::Broadcast as u32,
            trans_req_addr: DevId::Broadcast as u32,
            resp_req_addr: DevId::Broadcast as u32,
        }
    }
}

/// Build the header into the message buffer from the header record, leaving
/// the cursor at the start of the payload.
pub(crate) fn build(msg: &mut Msg) {
    msg.cursor = msg.att_start;

    let hdr = &mut msg.header;
    hdr.add_option_byte1 = hdr.add_crc32;

    let mut option_byte: u8 = hdr.msg_type.nibble();
    option_byte |= (hdr.ff_ext as u8) << OPT0_FF_EXT_SHIFT;
    option_byte |= (hdr.remove_req_fields as u8) << OPT0_REMOVE_REQ_SHIFT;
    option_byte |= (hdr.remove_addr_fields as u8) << OPT0_REMOVE_ADDR_SHIFT;
    option_byte |= (hdr.add_option_byte1 as u8) << OPT0_OPTION_BYTE1_SHIFT;

    msg.put_extd_val(msg.header.attrib);
    msg.write_u8(option_byte);

    if msg.header.add_option_byte1 {
        msg.write_u8((msg.header.add_crc32 as u8) << OPT1_CRC32_SHIFT);
    }

    if !msg.header.remove_addr_fields {
        msg.put_extd_val(msg.header.source_addr);
        msg.put_extd_val(msg.header.target_addr);
    } else {
        msg.header.source_addr = DevId::Broadcast as u32;
        msg.header.target_addr = DevId::Broadcast as u32;
    }

    if !msg.header.remove_req_fields {
        msg.put_extd_val(msg.header.trans_req_addr);
        msg.put_extd_val(msg.header.resp_req_addr);
    } else {
        msg.header.trans_req_addr = DevId::Broadcast as u32;
        msg.header.resp_req_addr = DevId::Broadcast as u32;
    }

    if msg.header.ff_ext {
        msg.write_u8(msg.header.ff_ext_r0);
        msg.write_u8(msg.header.ff_ext_r1);
    }

    msg.mark_payload_start();
}

/// Parse the header out of the message buffer into the header record,
/// leaving the cursor at the start of the payload.
pub(crate) fn parse(msg: &mut Msg) -> Result<()> {
    msg.cursor = msg.att_start;

    msg.header.attrib = msg.get_extd_val();

    let option_byte = msg.read_u8();
    msg.header.msg_type = MsgType::from_nibble(option_byte)
        .ok_or(Error::MsgTypeNotSupported(option_byte & 0xf))?;
    msg.header.ff_ext = (option_byte >> OPT0_FF_EXT_SHIFT) & 0x1 != 0;
    msg.header.remove_req_fields = (option_byte >> OPT0_REMOVE_REQ_SHIFT) & 0x1 != 0;
    msg.header.remove_addr_fields = (option_byte >> OPT0_REMOVE_ADDR_SHIFT) & 0x1 != 0;
    msg.header.add_option_byte1 = (option_byte >> OPT0_OPTION_BYTE1_SHIFT) & 0x1 != 0;

    if msg.header.add_option_byte1 {
        let option_byte1 = msg.read_u8();
        msg.header.add_crc32 = (option_byte1 >> OPT1_CRC32_SHIFT) & 0x1 != 0;
    }

    if !msg.header.remove_addr_fields {
        msg.header.source_addr = msg.get_extd_val();
        msg.header.target_addr = msg.get_extd_val();
    }

    if !msg.header.remove_req_fields {
        msg.header.trans_req_addr = msg.get_extd_val();
        msg.header.resp_req_addr = msg.get_extd_val();
    }

    if msg.header.ff_ext {
        msg.header.ff_ext_r0 = msg.read_u8();
        msg.header.ff_ext_r1 = msg.read_u8();
    }

    msg.mark_payload_start();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(mut tx: Msg) -> Msg {
        tx.att_start = 4;
        build(&mut tx);

        let mut rx = Msg::new();
        rx.buf = tx.buf;
        rx.att_start = 4;
        parse(&mut rx).unwrap();
        assert_eq!(tx.cursor, rx.cursor);
        assert_eq!(tx.payload_start, rx.payload_start);
        rx
    }

    #[test]
    fn full_header_round_trips() {
        let mut tx = Msg::new();
        tx.header.attrib = 1126;
        tx.header.msg_type = MsgType::WriteRel;
        tx.header.add_crc32 = true;
        tx.header.source_addr = 0x12345;
        tx.header.target_addr = DevId::Gimbal as u32;
        tx.header.trans_req_addr = DevId::MoviController as u32;
        tx.header.resp_req_addr = DevId::InternalGui as u32;

        let rx = round_trip(tx);
        assert_eq!(1126, rx.header.attrib);
        assert_eq!(MsgType::WriteRel, rx.header.msg_type);
        assert!(rx.header.add_crc32);
        assert_eq!(0x12345, rx.header.source_addr);
        assert_eq!(DevId::Gimbal as u32, rx.header.target_addr);
        assert_eq!(DevId::MoviController as u32, rx.header.trans_req_addr);
        assert_eq!(DevId::InternalGui as u32, rx.header.resp_req_addr);
    }

    #[test]
    fn removed_fields_collapse_to_broadcast() {
        let mut tx = Msg::new();
        tx.header.attrib = 34;
        tx.header.msg_type = MsgType::Read;
        tx.header.remove_addr_fields = true;
        tx.header.remove_req_fields = true;
        tx.header.source_addr = 0x55; // must not survive the build

        let rx = round_trip(tx);
        // attribute + option byte only
        assert_eq!(4 + 2, rx.payload_start);
        assert_eq!(DevId::Broadcast as u32, rx.header.source_addr);
        assert_eq!(DevId::Broadcast as u32, rx.header.target_addr);
    }

    #[test]
    fn ff_extension_bytes_carried() {
        let mut tx = Msg::new();
        tx.header.attrib = 51;
        tx.header.msg_type = MsgType::CurVal;
        tx.header.ff_ext = true;
        tx.header.ff_ext_r0 = 0xa5;
        tx.header.ff_ext_r1 = 0x5a;

        let rx = round_trip(tx);
        assert_eq!(0xa5, rx.header.ff_ext_r0);
        assert_eq!(0x5a, rx.header.ff_ext_r1);
    }

    #[test]
    fn unknown_type_nibble_rejected() {
        let mut rx = Msg::new();
        rx.att_start = 4;
        rx.buf[4] = 34; // attribute
        rx.buf[5] = 0x07; // type nibble 7 does not exist
        assert_eq!(Err(Error::MsgTypeNotSupported(7)), parse(&mut rx));
    }
}
