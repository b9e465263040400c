//! Notification reports.
//!
//! Once a socket has been turned into a notification stream with `NOIB`,
//! the daemon writes a 12-byte report each time a monitored GPIO changes:
//!
//! ```text
//! seqno:u16  flags:u16  tick:u32  level:u32
//! ```
//!
//! `level` holds the levels of GPIO 0-31 at `tick` (microseconds since
//! daemon boot, wrapping).

use crate::{ensure_len, read_u16, read_u32, FrameError};

/// Size in bytes of one notification report.
pub const REPORT_LEN: usize = 12;

/// Flag word of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportFlags(pub u16);

impl ReportFlags {
    /// A watchdog timeout fired for the GPIO in the low bits.
    pub const WATCHDOG: u16 = 1 << 5;
    /// Keep-alive sent when nothing changed for a minute.
    pub const ALIVE: u16 = 1 << 6;
    /// An event, not a level change; event number in the low bits.
    pub const EVENT: u16 = 1 << 7;
    /// Mask of the GPIO/event number carried alongside the flags above.
    pub const GPIO_MASK: u16 = 0x1f;

    pub fn is_watchdog(self) -> bool {
        self.0 & Self::WATCHDOG != 0
    }

    pub fn is_keep_alive(self) -> bool {
        self.0 & Self::ALIVE != 0
    }

    pub fn is_event(self) -> bool {
        self.0 & Self::EVENT != 0
    }

    /// Returns true if the report describes a level change.
    pub fn is_level_change(self) -> bool {
        !(self.is_watchdog() || self.is_keep_alive() || self.is_event())
    }

    /// GPIO (or event number) carried by watchdog and event reports.
    pub fn gpio(self) -> u32 {
        u32::from(self.0 & Self::GPIO_MASK)
    }
}

/// One report read from a notification stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationReport {
    /// Sequence number, wrapping at `u16::MAX`.
    pub seqno: u16,
    pub flags: ReportFlags,
    /// Daemon tick in microseconds.
    pub tick: u32,
    /// Levels of GPIO 0-31.
    pub level: u32,
}

impl NotificationReport {
    /// Builds a level-change report.
    pub fn level_change(seqno: u16, tick: u32, level: u32) -> Self {
        Self {
            seqno,
            flags: ReportFlags::default(),
            tick,
            level,
        }
    }

    /// Level of `gpio` in this report.
    pub fn is_high(&self, gpio: u32) -> bool {
        gpio < 32 && self.level & (1 << gpio) != 0
    }

    pub fn encode(&self) -> [u8; REPORT_LEN] {
        let mut out = [0u8; REPORT_LEN];
        out[0..2].copy_from_slice(&self.seqno.to_le_bytes());
        out[2..4].copy_from_slice(&self.flags.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.tick.to_le_bytes());
        out[8..12].copy_from_slice(&self.level.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        ensure_len(bytes, REPORT_LEN)?;
        Ok(Self {
            seqno: read_u16(bytes, 0),
            flags: ReportFlags(read_u16(bytes, 2)),
            tick: read_u32(bytes, 4),
            level: read_u32(bytes, 8),
        })
    }
}

/// Number of reports missing between `previous` and `current`.
///
/// Sequence numbers wrap, so the distance is taken modulo 2^16.
pub fn missed_between(previous: u16, current: u16) -> u16 {
    current.wrapping_sub(previous).wrapping_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_layout() {
        let report = NotificationReport::level_change(0x0102, 0x0a0b0c0d, 1 << 21);
        let bytes = report.encode();
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(&bytes[4..8], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(NotificationReport::decode(&bytes).unwrap(), report);
    }

    #[test]
    fn test_report_decode_short() {
        assert!(matches!(
            NotificationReport::decode(&[0u8; 11]),
            Err(FrameError::Short { expected: 12, got: 11 })
        ));
    }

    #[test]
    fn test_level_flags() {
        assert!(ReportFlags(0).is_level_change());
        assert!(!ReportFlags(ReportFlags::ALIVE).is_level_change());

        let watchdog = ReportFlags(ReportFlags::WATCHDOG | 23);
        assert!(watchdog.is_watchdog());
        assert!(!watchdog.is_level_change());
        assert_eq!(watchdog.gpio(), 23);

        assert!(ReportFlags(ReportFlags::EVENT | 4).is_event());
    }

    #[test]
    fn test_is_high() {
        let report = NotificationReport::level_change(0, 0, (1 << 21) | (1 << 31));
        assert!(report.is_high(21));
        assert!(report.is_high(31));
        assert!(!report.is_high(23));
        assert!(!report.is_high(40));
    }

    #[test]
    fn test_missed_between() {
        assert_eq!(missed_between(4, 5), 0);
        assert_eq!(missed_between(4, 8), 3);
        assert_eq!(missed_between(u16::MAX, 0), 0);
        assert_eq!(missed_between(u16::MAX - 1, 1), 2);
    }
}
