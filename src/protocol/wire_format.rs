//! Wire format constants: flag bits, control codes, and sizing.
//!
//! Every physical transaction on an application stream starts with two
//! big-endian int32 fields:
//! ```text
//! ┌─────────────┬─────────────┬────────────────────────────────┐
//! │ flags       │ seq number  │ flag-selected payload sections │
//! │ int32 BE    │ int32 BE    │ (prefix / message / suffix)    │
//! └─────────────┴─────────────┴────────────────────────────────┘
//! ```
//! For suffix-bearing transactions sent by a server, the upper 16 bits of
//! the flags word carry the status code.

/// Maximum message bytes carried by one physical transaction.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Maximum unacknowledged application-stream bytes in flight.
pub const FLOW_CONTROL_WINDOW_SIZE: i64 = 128 * 1024;

/// Protocol version sent in the SETUP transaction.
pub const WIRE_FORMAT_VERSION: i32 = 1;

/// First transaction code usable by an application stream. Codes below this
/// are reserved for control transactions.
pub const FIRST_CALL_ID: u32 = 1 + 1000;

/// Successful stream outcome.
pub const STATUS_OK: i32 = 0;

/// Stream outcome reported when an inbound transaction could not be decoded.
pub const STATUS_INTERNAL: i32 = 13;

/// Flag bit constants for the leading flags word.
pub mod flags {
    /// Route name + initial metadata present.
    pub const PREFIX: i32 = 0x1;
    /// Message payload chunk present.
    pub const MESSAGE_DATA: i32 = 0x2;
    /// Trailing metadata / status present.
    pub const SUFFIX: i32 = 0x4;
    /// This is a non-final chunk of a larger message.
    pub const MESSAGE_DATA_PARTIAL: i32 = 0x8;
    /// The suffix carries a human-readable status description string.
    pub const STATUS_DESCRIPTION: i32 = 0x20;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: i32, flag: i32) -> bool {
        flags & flag != 0
    }

    /// Extract the status code from the upper 16 bits of a flags word.
    #[inline]
    pub fn status_of(flags: i32) -> i32 {
        (flags >> 16) & 0xffff
    }

    /// Pack a status code into the upper 16 bits of a flags word.
    #[inline]
    pub fn with_status(flags: i32, status: i32) -> i32 {
        flags | ((status & 0xffff) << 16)
    }
}

/// Reserved control transaction codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// First transaction on the channel; carries version and reverse handle.
    Setup = 1,
    /// Orderly channel teardown notice.
    Shutdown = 2,
    /// Cumulative received-byte report for flow control (int64 payload).
    AcknowledgeBytes = 3,
    /// Liveness probe (int32 ping id).
    Ping = 4,
    /// Answer to a liveness probe, echoing the ping id.
    PingResponse = 5,
}

impl ControlCode {
    /// The wire value of this control code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a raw transaction code to a control code, if it is one.
    pub fn from_code(code: u32) -> Option<ControlCode> {
        match code {
            1 => Some(ControlCode::Setup),
            2 => Some(ControlCode::Shutdown),
            3 => Some(ControlCode::AcknowledgeBytes),
            4 => Some(ControlCode::Ping),
            5 => Some(ControlCode::PingResponse),
            _ => None,
        }
    }
}

/// Check whether a transaction code belongs to an application stream.
#[inline]
pub fn is_stream_code(code: u32) -> bool {
    code >= FIRST_CALL_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits_do_not_collide() {
        let all = [
            flags::PREFIX,
            flags::MESSAGE_DATA,
            flags::SUFFIX,
            flags::MESSAGE_DATA_PARTIAL,
            flags::STATUS_DESCRIPTION,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn test_status_packing() {
        let f = flags::with_status(flags::SUFFIX, 7);
        assert_eq!(f & 0xffff, flags::SUFFIX);
        assert_eq!(flags::status_of(f), 7);

        // Status zero leaves the word untouched.
        assert_eq!(flags::with_status(flags::SUFFIX, 0), flags::SUFFIX);
        assert_eq!(flags::status_of(flags::SUFFIX), 0);
    }

    #[test]
    fn test_control_code_roundtrip() {
        for code in [
            ControlCode::Setup,
            ControlCode::Shutdown,
            ControlCode::AcknowledgeBytes,
            ControlCode::Ping,
            ControlCode::PingResponse,
        ] {
            assert_eq!(ControlCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ControlCode::from_code(0), None);
        assert_eq!(ControlCode::from_code(6), None);
        assert_eq!(ControlCode::from_code(FIRST_CALL_ID), None);
    }

    #[test]
    fn test_stream_code_threshold() {
        assert!(!is_stream_code(1));
        assert!(!is_stream_code(1000));
        assert!(is_stream_code(FIRST_CALL_ID));
        assert!(is_stream_code(u32::MAX));
    }
}
