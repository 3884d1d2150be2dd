use crate::msg::{Msg, MSG_BUF_LEN};

/// A port is marked disconnected after this long without a good frame.
pub const PORT_TIMEOUT_MS: u32 = 500;

/// Stream receive state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    StartWait,
    GetProtoVer,
    GetQxLen0,
    GetQxLen1,
    GetQbLen0,
    GetQbLen1,
    GetData,
    GetChksum,
}

/// One logical receive channel.
///
/// Each port owns a dedicated message instance that frames are assembled
/// into, the framer state, and diagnostic counters. Ports are independent:
/// the engine never shares an in-progress buffer between them.
pub struct CommsPort {
    pub(crate) rx_state: RxState,
    /// Count of characters received from the stream for the current frame.
    pub(crate) rx_cntr: u16,
    pub(crate) rx_msg: Msg,
    /// Running 8 bit checksum over the attribute and payload bytes.
    pub(crate) running_checksum: u8,
    /// Counts up from the last successful message; cleared on reception.
    pub(crate) timeout_cntr: u32,
    pub(crate) connected: bool,
    /// Set once the declared length has passed the per-attribute check.
    pub(crate) len_approved: bool,
    pub(crate) rx_msg_start_time: u32,
    pub(crate) last_rx_msg_time: u32,
    pub(crate) chksum_fail_cnt: u32,
    /// Non 'Q' characters seen while waiting for a start byte. Very helpful
    /// for debugging comms.
    pub(crate) non_q_cnt: u32,
    pub(crate) len_reject_cnt: u32,
    pub(crate) crc32_fail_cnt: u32,
    pub(crate) legacy_unsupported_cnt: u32,
}

impl CommsPort {
    pub(crate) fn new() -> Self {
        CommsPort {
            rx_state: RxState::StartWait,
            rx_cntr: 0,
            rx_msg: Msg::new(),
            running_checksum: 0,
            timeout_cntr: 0,
            connected: false,
            len_approved: false,
            rx_msg_start_time: 0,
            last_rx_msg_time: 0,
            chksum_fail_cnt: 0,
            non_q_cnt: 0,
            len_reject_cnt: 0,
            crc32_fail_cnt: 0,
            legacy_unsupported_cnt: 0,
        }
    }

    // Append one received byte to the in-progress message. False when the
    // buffer is exhausted; the caller abandons the frame.
    pub(crate) fn push_rx_byte(&mut self, byte: u8) -> bool {
        if self.rx_msg.cursor >= MSG_BUF_LEN {
            return false;
        }
        self.rx_msg.buf[self.rx_msg.cursor] = byte;
        self.rx_msg.cursor += 1;
        self.rx_cntr += 1;
        true
    }

    /// Connection flag: set by each good frame, cleared by
    /// [`Context::connection_status_update`](crate::Context::connection_status_update)
    /// after [`PORT_TIMEOUT_MS`] of silence.
    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn chksum_fail_cnt(&self) -> u32 {
        self.chksum_fail_cnt
    }

    pub fn non_q_cnt(&self) -> u32 {
        self.non_q_cnt
    }

    pub fn len_reject_cnt(&self) -> u32 {
        self.len_reject_cnt
    }

    pub fn crc32_fail_cnt(&self) -> u32 {
        self.crc32_fail_cnt
    }

    pub fn legacy_unsupported_cnt(&self) -> u32 {
        self.legacy_unsupported_cnt
    }
}
