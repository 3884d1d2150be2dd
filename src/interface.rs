use crate::crc32;
use crate::msg::{Msg, MAX_PAYLOAD_LEN_DEFAULT};

/// Application side of the protocol engine.
///
/// The engine is transport agnostic: the application routes finished frames
/// to the right UART/BLE/USB buffer, supplies a millisecond clock, and may
/// override the lookup and CRC hooks. Only [`send_to_port`](Self::send_to_port)
/// and [`ticks_ms`](Self::ticks_ms) are required.
pub trait Interface {
    /// Transmit a finished frame ([`Msg::frame_bytes`]) on its comms port.
    fn send_to_port(&self, msg: &Msg);

    /// Free-running millisecond counter.
    fn ticks_ms(&self) -> u32;

    /// Called with messages whose target address is foreign so the
    /// application can proxy them out other ports. The message must not be
    /// modified.
    fn forward(&self, _msg: &Msg) {}

    /// Maximum allowed message length for an attribute.
    ///
    /// Override to allow selected attributes an extended length, up to the
    /// compiled buffer capacity. If you do, also enable the packet timeout
    /// so a long packet with lost bytes can't stall the parser.
    fn packet_len_lookup(&self, _attrib: u32) -> u32 {
        MAX_PAYLOAD_LEN_DEFAULT as u32
    }

    /// CRC32 over `data` continuing from `initial`. The default is the
    /// software implementation; override to substitute a hardware unit with
    /// identical parameters.
    fn accumulate_crc32(&self, initial: u32, data: &[u8]) -> u32 {
        crc32::accumulate(initial, data)
    }

    /// 96 bit MCU unique id, used for UID-type endpoint addresses.
    fn mcu_uid(&self) -> [u8; 12] {
        [0; 12]
    }

    /// Channel latency for the packet timeout. Set this higher than you
    /// might think you need; hundreds of milliseconds is typical over USB.
    fn port_latency_ms(&self, _port: u8) -> u32 {
        0
    }

    /// Inverse baudrate, milliseconds per bit times 4096, for the packet
    /// timeout.
    fn port_ms_per_bit_x4096(&self, _port: u8) -> u32 {
        0
    }
}
