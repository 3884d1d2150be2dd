use std::cell::{Cell, RefCell};

use qx_protocol::schema::{self, Field, Schema, SchemaTable, WireType};
use qx_protocol::{Context, Cursor, DevId, IdType, Interface, Msg, MsgType};

struct Uart {
    tx_frames: RefCell<Vec<Vec<u8>>>,
    now_ms: Cell<u32>,
}

impl Uart {
    fn new() -> Self {
        Uart {
            tx_frames: RefCell::new(Vec::new()),
            now_ms: Cell::new(0),
        }
    }
}

impl Interface for Uart {
    fn send_to_port(&self, msg: &Msg) {
        self.tx_frames.borrow_mut().push(msg.frame_bytes().to_vec());
    }

    fn ticks_ms(&self) -> u32 {
        self.now_ms.get()
    }
}

const TIMELAPSE_FIELDS: &[Field] = &[
    Field::new(WireType::U8, 1, f32::MAX, f32::MIN, 1.0),
    Field::new(WireType::I16, 1, f32::MAX, f32::MIN, 100.0),
    Field::new(WireType::U8, 1, f32::MAX, f32::MIN, 1.0),
    Field::skip(3),
    Field::new(WireType::I16, 4, f32::MAX, f32::MIN, 10.0),
    Field::new(WireType::I32, 1, f32::MAX, f32::MIN, 1.0),
];

const TABLE: SchemaTable = SchemaTable(&[Schema {
    attrib: 34,
    params: "Timelapse Keyframe,Timelapse Progress,Timelapse state,Timelapse Pan Offset,\
             Timelapse Tilt,Timelapse Roll,Timelapse Pan,Pan Revolutions",
    fields: TIMELAPSE_FIELDS,
}]);

struct App {
    vals: RefCell<[f32; 9]>,
}

impl App {
    fn new() -> Self {
        App {
            vals: RefCell::new([0.0; 9]),
        }
    }
}

fn srv_parser(app: &App, msg: &mut Msg) {
    match TABLE.get(msg.header.attrib) {
        Some(entry) => {
            let mut vals = app.vals.borrow_mut();
            vals[0] = msg.header.attrib as f32;
            schema::run(entry, &mut Cursor::new(msg), &mut vals[..]);
        }
        None => msg.set_att_not_handled(),
    }
}

fn gimbal_server<'a, 'b>(uart: &'a Uart, app: &'b App) -> Context<'a, 'b, Uart, App> {
    let mut qx = Context::new(String::from("gimbal"), uart, app, 1);
    qx.init_server(DevId::Gimbal, IdType::Device, srv_parser);
    qx
}

fn feed(qx: &mut Context<Uart, App>, bytes: &[u8]) -> bool {
    let mut delivered = false;
    for &byte in bytes {
        delivered |= qx.stream_rx_char(0, byte);
    }
    delivered
}

// Read request for attribute 34 from the internal GUI to the gimbal,
// request fields removed: 'Q' 'X' len attr option source target checksum.
const READ_34: [u8; 8] = [0x51, 0x58, 0x04, 0x22, 0x21, 0x04, 0x02, 0xb6];

#[test]
fn read_request_yields_current_value() {
    let uart = Uart::new();
    let app = App::new();
    *app.vals.borrow_mut() = [0.0, 1.0, 0.5, 2.0, 0.0, 10.0, 20.0, 30.0, 5.0];
    let mut qx = gimbal_server(&uart, &app);

    assert!(feed(&mut qx, &READ_34));

    let frames = uart.tx_frames.borrow();
    assert_eq!(1, frames.len());
    let resp = &frames[0];
    // Current value, attribute 34, addresses kept and reversed, request
    // fields removed. Header is 4 bytes, the timelapse payload 19.
    assert_eq!([0x51, 0x58, 0x17, 0x22, 0x20, 0x02, 0x04], resp[..7]);
    assert_eq!(3 + 0x17 + 1, resp.len());
}

#[test]
fn delivered_frame_sums_to_0xff() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    assert!(feed(&mut qx, &READ_34));

    // The outer checksum makes the attribute..checksum range sum to 0xFF,
    // for the request we fed and for the response the server produced.
    let frames = uart.tx_frames.borrow();
    let resp = &frames[0];
    let sum = resp[3..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    assert_eq!(0xff, sum);
    let sum = READ_34[3..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    assert_eq!(0xff, sum);
}

#[test]
fn oversize_length_rejected_before_dispatch() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    // Declared length 200 needs the two byte form; attribute 34 only allows
    // the default 64. The frame is abandoned as soon as the attribute id is
    // complete.
    assert!(!feed(&mut qx, &[0x51, 0x58, 0xc8, 0x01, 0x22]));
    assert_eq!(1, qx.port(0).len_reject_cnt());
    assert_eq!(0, qx.port(0).chksum_fail_cnt());
    assert!(uart.tx_frames.borrow().is_empty());

    // The framer is back in start-wait: the next frame goes through.
    assert!(feed(&mut qx, &READ_34));
    assert_eq!(1, uart.tx_frames.borrow().len());
}

#[test]
fn bad_checksum_counted_and_dropped() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    let mut frame = READ_34;
    frame[7] = frame[7].wrapping_add(1);
    assert!(!feed(&mut qx, &frame));
    assert_eq!(1, qx.port(0).chksum_fail_cnt());
    assert!(uart.tx_frames.borrow().is_empty());
}

#[test]
fn resyncs_after_garbage() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    assert!(!feed(&mut qx, &[0x00, 0xff, 0x42]));
    assert_eq!(3, qx.port(0).non_q_cnt());
    assert!(feed(&mut qx, &READ_34));
}

#[test]
fn double_start_byte_accepted() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    // 'QQX...' restarts the packet on the second Q instead of dropping it.
    let mut frame = vec![0x51];
    frame.extend_from_slice(&READ_34);
    assert!(feed(&mut qx, &frame));
    assert_eq!(1, uart.tx_frames.borrow().len());
}

#[test]
fn legacy_frame_without_hooks_dropped() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    // 'Q' 'B', big-endian length 2, attribute and option, checksum.
    let delivered = feed(&mut qx, &[0x51, 0x42, 0x00, 0x02, 0x22, 0x21, 0xbc]);
    assert!(delivered, "the frame itself is well formed");
    assert_eq!(1, qx.port(0).legacy_unsupported_cnt());
    assert!(uart.tx_frames.borrow().is_empty());
}

// Toy legacy header: one attribute byte, one type byte. The real layout is
// owned by whoever installs the hooks.
fn legacy_build(_app: &App, msg: &mut Msg) {
    msg.write_u8(msg.header.attrib as u8);
    msg.write_u8(msg.header.msg_type.nibble());
    msg.mark_payload_start();
}

fn legacy_parse(_app: &App, msg: &mut Msg) {
    msg.header.attrib = msg.read_u8() as u32;
    let nibble = msg.read_u8();
    msg.header.msg_type = MsgType::from_nibble(nibble).unwrap_or(MsgType::CurVal);
    msg.mark_payload_start();
}

#[test]
fn legacy_hooks_parse_and_answer_in_kind() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);
    qx.set_legacy_hooks(legacy_build, legacy_parse);

    // 'Q' 'B', big-endian length 21: attribute 34, write-absolute, and a
    // zeroed 19 byte timelapse payload.
    let mut frame = vec![0x51, 0x42, 0x00, 0x15, 0x22, 0x02];
    frame.extend_from_slice(&[0u8; 19]);
    frame.push(0xff - 0x24);

    assert!(feed(&mut qx, &frame));
    assert_eq!(0, qx.port(0).legacy_unsupported_cnt());
    assert_eq!(34.0, app.vals.borrow()[0]);

    // The write echo keeps the legacy framing.
    let frames = uart.tx_frames.borrow();
    assert_eq!(1, frames.len());
    assert_eq!([0x51, 0x42, 0x00, 0x15], frames[0][..4]);
}

#[test]
fn connection_status_times_out() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    assert!(!qx.port(0).connected());
    feed(&mut qx, &READ_34);
    assert!(qx.port(0).connected());

    uart.now_ms.set(499);
    qx.connection_status_update(0);
    assert!(qx.port(0).connected());

    uart.now_ms.set(501);
    qx.connection_status_update(0);
    assert!(!qx.port(0).connected());
}

#[test]
fn unknown_attribute_read_sends_no_response() {
    let uart = Uart::new();
    let app = App::new();
    let mut qx = gimbal_server(&uart, &app);

    // Read for attribute 35: the response parser flags it unhandled, which
    // suppresses the response entirely.
    let frame = [0x51, 0x58, 0x04, 0x23, 0x21, 0x04, 0x02, 0xb5];
    assert!(feed(&mut qx, &frame));
    assert!(uart.tx_frames.borrow().is_empty());
}
