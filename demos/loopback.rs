//! A gimbal server and an API client wired back to back through in-memory
//! UARTs. The client nudges one roll parameter with a relative write; the
//! server applies it and answers with the attribute's current values.
//!
//! Run with `RUST_LOG=debug cargo run --example loopback` to watch the
//! engine's framing and dispatch decisions.

use std::cell::RefCell;

use qx_protocol::schema::{self, Field, Schema, SchemaTable, WireType};
use qx_protocol::{Context, Cursor, DevId, IdType, Interface, Msg, ParseType, TxOptions};

const ROLL_FIELDS: &[Field] = &[
    Field::new(WireType::U8, 1, 255.0, 0.0, 1.0),
    Field::new(WireType::I16, 1, 100.0, -100.0, 10.0),
    Field::new(WireType::I16, 1, 500.0, 0.0, 1.0),
    Field::new(WireType::I16, 1, 90.0, -90.0, 10.0),
];

const ROLL: Schema = Schema {
    attrib: 306,
    params: "Roll Mode,Roll Smoothing,Roll Window,Roll Majestic Span",
    fields: ROLL_FIELDS,
};

const TABLE: SchemaTable = SchemaTable(&[ROLL]);

struct Uart {
    rx_buf: RefCell<Vec<u8>>,
}

impl Uart {
    fn new() -> Self {
        Uart {
            rx_buf: RefCell::new(Vec::new()),
        }
    }

    fn drain(&self) -> Vec<u8> {
        self.rx_buf.borrow_mut().drain(..).collect()
    }
}

impl Interface for Uart {
    fn send_to_port(&self, msg: &Msg) {
        // Loop straight back to the peer's receive buffer.
        self.rx_buf.borrow_mut().extend_from_slice(msg.frame_bytes());
    }

    fn ticks_ms(&self) -> u32 {
        0
    }
}

struct App {
    vals: RefCell<[f32; 5]>,
    tx_vals: RefCell<[f32; 5]>,
    rx_vals: RefCell<[f32; 5]>,
}

impl App {
    fn new() -> Self {
        App {
            vals: RefCell::new([0.0; 5]),
            tx_vals: RefCell::new([0.0; 5]),
            rx_vals: RefCell::new([0.0; 5]),
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

fn cli_parser(app: &App, msg: &mut Msg) {
    let Some(entry) = TABLE.get(msg.header.attrib) else {
        msg.set_att_not_handled();
        return;
    };
    let mut vals = match msg.parse_type {
        ParseType::CurValRecv => app.rx_vals.borrow_mut(),
        _ => app.tx_vals.borrow_mut(),
    };
    vals[0] = msg.header.attrib as f32;
    schema::run(entry, &mut Cursor::new(msg), &mut vals[..]);
}

fn pump(from: &Uart, into: &mut Context<Uart, App>) -> bool {
    let mut delivered = false;
    for byte in from.drain() {
        delivered |= into.stream_rx_char(0, byte);
    }
    delivered
}

fn main() {
    env_logger::init();

    let srv_uart = Uart::new();
    let srv_app = App::new();
    let mut server = Context::new(String::from("gimbal"), &srv_uart, &srv_app, 1);
    server.init_server(DevId::Gimbal, IdType::Device, srv_parser);
    *srv_app.vals.borrow_mut() = [0.0, 1.0, 20.0, 250.0, -12.5];

    let cli_uart = Uart::new();
    let cli_app = App::new();
    let mut client = Context::new(String::from("api"), &cli_uart, &cli_app, 1);
    let cli = client.init_client(DevId::MoviApiController, IdType::Device, cli_parser);

    // Nudge one named parameter by +5.0, everything else untouched.
    let index = ROLL.param_index("Roll Smoothing").unwrap();
    cli_app.tx_vals.borrow_mut()[index] = 5.0;

    let options = TxOptions {
        target_addr: DevId::Gimbal as u32,
        ..TxOptions::default()
    };
    client.send_cli_write_rel(cli, ROLL.attrib, 0, options).unwrap();

    // Client -> server: the write is applied and the echo queued.
    assert!(pump(&cli_uart, &mut server));
    println!("gimbal values after write: {:?}", &srv_app.vals.borrow()[1..]);

    // Server -> client: the echo lands in the client's received values.
    assert!(pump(&srv_uart, &mut client));
    println!("client now sees:          {:?}", &cli_app.rx_vals.borrow()[1..]);
}
