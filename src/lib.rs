//! # QX
//! QX is the compact binary request/response protocol used by the Freefly
//! gimbal ecosystem to exchange parameter attributes between clients
//! (controllers, phones, GUIs) and servers (the device).
//!
//! The engine frames and deframes variable-length messages from a byte
//! stream, codes the extensible header, validates an 8 bit outer checksum
//! and an optional CRC32, routes messages to registered client/server
//! endpoints by address, and converts payloads between packed wire integers
//! and application values with per-field scale and clamp. The physical
//! transport, the millisecond clock and the per-attribute schemas are
//! supplied by the application through the [`Interface`] trait and parser
//! callbacks.
//!
//! ## Example
//! ```
//! use std::cell::RefCell;
//! use qx_protocol::{Context, Cursor, DevId, IdType, Interface, Msg, TxOptions};
//!
//! // Application state: the device's roll parameters, and what a client
//! // last heard about them. Parser callbacks take shared references, so
//! // mutability is interior.
//! struct App {
//!     angles: RefCell<[f32; 2]>,
//!     received: RefCell<[f32; 2]>,
//! }
//!
//! struct Uart {
//!     loopback: RefCell<Vec<u8>>,
//! }
//!
//! impl Interface for Uart {
//!     fn send_to_port(&self, msg: &Msg) {
//!         self.loopback.borrow_mut().extend_from_slice(msg.frame_bytes());
//!     }
//!
//!     fn ticks_ms(&self) -> u32 {
//!         0
//!     }
//! }
//!
//! fn srv_parser(app: &App, msg: &mut Msg) {
//!     match msg.header.attrib {
//!         306 => {
//!             let mut angles = app.angles.borrow_mut();
//!             Cursor::new(msg).f32_as_i16(&mut angles[..], 180.0, -180.0, 10.0);
//!         }
//!         _ => msg.set_att_not_handled(),
//!     }
//! }
//!
//! fn cli_parser(app: &App, msg: &mut Msg) {
//!     match msg.header.attrib {
//!         306 => {
//!             let mut received = app.received.borrow_mut();
//!             Cursor::new(msg).f32_as_i16(&mut received[..], 180.0, -180.0, 10.0);
//!         }
//!         _ => msg.set_att_not_handled(),
//!     }
//! }
//!
//! fn main() {
//!     let uart = Uart {
//!         loopback: RefCell::new(Vec::new()),
//!     };
//!     let app = App {
//!         angles: RefCell::new([12.5, -30.0]),
//!         received: RefCell::new([0.0, 0.0]),
//!     };
//!     let mut qx = Context::new(String::from("gimbal"), &uart, &app, 1);
//!     let srv = qx.init_server(DevId::Gimbal, IdType::Device, srv_parser);
//!     qx.init_client(DevId::InternalGui, IdType::Device, cli_parser);
//!
//!     // Publish the current value of attribute 306 on port 0.
//!     qx.send_srv_cur_val(srv, 306, 0, TxOptions::default()).unwrap();
//!
//!     // Feed the wire bytes back in; the broadcast current value lands in
//!     // the local client.
//!     let wire = uart.loopback.borrow().clone();
//!     let mut delivered = false;
//!     for byte in wire {
//!         delivered |= qx.stream_rx_char(0, byte);
//!     }
//!     assert!(delivered);
//!     assert_eq!([12.5, -30.0], *app.received.borrow());
//! }
//! ```

mod context;
mod error;
mod header;
mod interface;
mod msg;
mod parse;
mod port;

pub mod crc32;
pub mod schema;
pub mod varint;

pub use context::{Context, ParserFn};
pub use error::{Error, Result};
pub use header::Header;
pub use interface::Interface;
pub use msg::{
    DevId, IdType, Msg, MsgType, ParseType, TxOptions, MAX_OUTER_FRAME_LEN, MAX_PAYLOAD_LEN,
    MAX_PAYLOAD_LEN_DEFAULT, MSG_BUF_LEN,
};
pub use parse::{Cursor, Dir};
pub use port::{CommsPort, RxState, PORT_TIMEOUT_MS};
