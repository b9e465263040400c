//! Command and response frames.
//!
//! Every request on the command socket is four little-endian words:
//! `cmd, p1, p2, p3`. The daemon answers with the same layout, echoing
//! `cmd, p1, p2` and putting the result in the fourth word.

use std::fmt;

use crate::status::PigpioError;
use crate::{ensure_len, read_u32, FrameError};

/// Size in bytes of a command or response frame.
pub const COMMAND_LEN: usize = 16;

/// The subset of daemon commands used for edge counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandCode {
    /// Read the levels of GPIO 0-31.
    ReadBank1 = 10,
    /// Hardware revision of the board.
    HardwareVersion = 17,
    /// Start reporting the GPIO in `p2` on notify handle `p1`.
    NotifyBegin = 19,
    /// Close a notify handle.
    NotifyClose = 21,
    /// Version of the running daemon.
    DaemonVersion = 26,
    /// Set the glitch filter of GPIO `p1` to `p2` microseconds.
    GlitchFilter = 97,
    /// Open an in-band notification stream on the issuing socket.
    NotifyOpenInBand = 99,
}

impl CommandCode {
    /// Every command known to this crate.
    pub const ALL: [CommandCode; 7] = [
        CommandCode::ReadBank1,
        CommandCode::HardwareVersion,
        CommandCode::NotifyBegin,
        CommandCode::NotifyClose,
        CommandCode::DaemonVersion,
        CommandCode::GlitchFilter,
        CommandCode::NotifyOpenInBand,
    ];

    /// Wire value of the command.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Looks up a command by its wire value.
    pub fn from_code(code: u32) -> Result<Self, FrameError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or(FrameError::UnknownCommand(code))
    }

    /// Short mnemonic used by the daemon's own command-line tool.
    pub fn mnemonic(self) -> &'static str {
        match self {
            CommandCode::ReadBank1 => "BR1",
            CommandCode::HardwareVersion => "HWVER",
            CommandCode::NotifyBegin => "NB",
            CommandCode::NotifyClose => "NC",
            CommandCode::DaemonVersion => "PIGPV",
            CommandCode::GlitchFilter => "FG",
            CommandCode::NotifyOpenInBand => "NOIB",
        }
    }

    /// Returns true if the response word is a raw value rather than a status.
    ///
    /// `BR1` returns a bit-field in which GPIO 31 lands in the sign bit, so
    /// it must never be interpreted as an error code.
    pub fn returns_raw_word(self) -> bool {
        matches!(self, CommandCode::ReadBank1 | CommandCode::HardwareVersion)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A request sent on the command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    pub command: CommandCode,
    pub p1: u32,
    pub p2: u32,
    /// Length of the extension that follows the frame. Always zero for the
    /// commands in [`CommandCode`].
    pub p3: u32,
}

impl CommandFrame {
    /// Creates a frame with both parameters set.
    pub const fn new(command: CommandCode, p1: u32, p2: u32) -> Self {
        Self {
            command,
            p1,
            p2,
            p3: 0,
        }
    }

    /// `BR1`: read the levels of GPIO 0-31.
    pub const fn read_bank_1() -> Self {
        Self::new(CommandCode::ReadBank1, 0, 0)
    }

    /// `PIGPV`: query the daemon version.
    pub const fn daemon_version() -> Self {
        Self::new(CommandCode::DaemonVersion, 0, 0)
    }

    /// `HWVER`: query the board revision.
    pub const fn hardware_version() -> Self {
        Self::new(CommandCode::HardwareVersion, 0, 0)
    }

    /// `NOIB`: turn the issuing socket into a notification stream.
    pub const fn notify_open_in_band() -> Self {
        Self::new(CommandCode::NotifyOpenInBand, 0, 0)
    }

    /// `NB`: report changes of the GPIO set in `bits` on `handle`.
    pub const fn notify_begin(handle: u32, bits: u32) -> Self {
        Self::new(CommandCode::NotifyBegin, handle, bits)
    }

    /// `NC`: close `handle`.
    pub const fn notify_close(handle: u32) -> Self {
        Self::new(CommandCode::NotifyClose, handle, 0)
    }

    /// `FG`: only report levels of `gpio` that stay stable for `steady_us`.
    pub const fn glitch_filter(gpio: u32, steady_us: u32) -> Self {
        Self::new(CommandCode::GlitchFilter, gpio, steady_us)
    }

    /// Encodes the frame as it goes on the wire.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        encode_words([self.command.code(), self.p1, self.p2, self.p3])
    }

    /// Decodes a frame, as the daemon side does.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        ensure_len(bytes, COMMAND_LEN)?;
        Ok(Self {
            command: CommandCode::from_code(read_u32(bytes, 0))?,
            p1: read_u32(bytes, 4),
            p2: read_u32(bytes, 8),
            p3: read_u32(bytes, 12),
        })
    }
}

/// The daemon's answer to a [`CommandFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Echo of the command word.
    pub command: u32,
    pub p1: u32,
    pub p2: u32,
    /// Result word: a status code for most commands, raw data for some.
    pub result: u32,
}

impl ResponseFrame {
    /// Builds a response echoing `request` with the given result word.
    pub fn for_request(request: &CommandFrame, result: u32) -> Self {
        Self {
            command: request.command.code(),
            p1: request.p1,
            p2: request.p2,
            result,
        }
    }

    /// Builds a response carrying a signed status.
    pub fn with_status(request: &CommandFrame, status: i32) -> Self {
        Self::for_request(request, status as u32)
    }

    /// Result word reinterpreted as the signed value the daemon produced.
    pub fn signed(&self) -> i32 {
        self.result as i32
    }

    /// Interprets the result word as a status.
    ///
    /// Non-negative values are returned as-is; negative values become a
    /// [`PigpioError`].
    pub fn status(&self) -> Result<u32, PigpioError> {
        let value = self.signed();
        if value < 0 {
            Err(PigpioError::from_code(value))
        } else {
            Ok(self.result)
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        encode_words([self.command, self.p1, self.p2, self.result])
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        ensure_len(bytes, COMMAND_LEN)?;
        Ok(Self {
            command: read_u32(bytes, 0),
            p1: read_u32(bytes, 4),
            p2: read_u32(bytes, 8),
            result: read_u32(bytes, 12),
        })
    }
}

fn encode_words(words: [u32; 4]) -> [u8; COMMAND_LEN] {
    let mut out = [0u8; COMMAND_LEN];
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_begin_layout() {
        let frame = CommandFrame::notify_begin(3, 1 << 21);
        let bytes = frame.encode();
        assert_eq!(&bytes[0..4], &19u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(1u32 << 21).to_le_bytes());
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_command_decode_matches_encode() {
        let frame = CommandFrame::glitch_filter(23, 250);
        assert_eq!(CommandFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_command_decode_unknown_code() {
        let mut bytes = CommandFrame::read_bank_1().encode();
        bytes[0] = 200;
        assert_eq!(
            CommandFrame::decode(&bytes),
            Err(FrameError::UnknownCommand(200))
        );
    }

    #[test]
    fn test_command_decode_short() {
        let err = CommandFrame::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Short {
                expected: 16,
                got: 10
            }
        );
    }

    #[test]
    fn test_response_status_negative_is_error() {
        let request = CommandFrame::glitch_filter(4, 400_000);
        let response = ResponseFrame::with_status(&request, -125);
        let err = response.status().unwrap_err();
        assert_eq!(err.code(), -125);
    }

    #[test]
    fn test_response_status_positive_is_value() {
        let request = CommandFrame::notify_open_in_band();
        let response = ResponseFrame::for_request(&request, 7);
        assert_eq!(response.status(), Ok(7));
        assert_eq!(response.command, 99);
    }

    #[test]
    fn test_bank_read_is_raw() {
        assert!(CommandCode::ReadBank1.returns_raw_word());
        assert!(!CommandCode::NotifyBegin.returns_raw_word());

        // GPIO 31 high sets the sign bit.
        let request = CommandFrame::read_bank_1();
        let response = ResponseFrame::for_request(&request, 0x8000_0001);
        assert!(response.signed() < 0);
        assert_eq!(response.result, 0x8000_0001);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(CommandCode::NotifyOpenInBand.to_string(), "NOIB");
        assert_eq!(CommandCode::GlitchFilter.to_string(), "FG");
        for code in CommandCode::ALL {
            assert_eq!(CommandCode::from_code(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_unused_daemon_commands_are_unknown() {
        // MODES and NP exist on the daemon but are never sent.
        for code in [0, 20] {
            assert_eq!(
                CommandCode::from_code(code),
                Err(FrameError::UnknownCommand(code))
            );
        }
    }
}
