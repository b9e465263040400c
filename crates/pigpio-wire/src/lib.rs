//! pigpio-wire - Socket protocol for the pigpio daemon
//!
//! This crate provides the fixed-size frames exchanged with `pigpiod`
//! over its TCP socket interface:
//! - `command` - 16-byte command and response frames
//! - `report` - 12-byte notification reports streamed on a notify socket
//! - `status` - daemon status codes returned in negative responses
//!
//! The crate is symmetric: both a client and a test double of the daemon
//! can encode and decode every frame.

pub mod command;
pub mod report;
pub mod status;

pub use command::{CommandCode, CommandFrame, ResponseFrame, COMMAND_LEN};
pub use report::{missed_between, NotificationReport, ReportFlags, REPORT_LEN};
pub use status::PigpioError;

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 8888;

/// Default host the daemon client library connects to.
pub const DEFAULT_HOST: &str = "localhost";

/// Highest GPIO number the daemon accepts for user callbacks.
pub const MAX_USER_GPIO: u32 = 31;

/// Errors produced while decoding frames.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer does not hold a whole frame.
    #[error("short frame: expected {expected} bytes, got {got}")]
    Short { expected: usize, got: usize },

    /// The command word is not one this crate knows about.
    #[error("unknown command code: {0}")]
    UnknownCommand(u32),
}

/// Reads a little-endian `u32` at `offset`. Callers check the length first.
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    if let Some(src) = bytes.get(offset..offset + 4) {
        word.copy_from_slice(src);
    }
    u32::from_le_bytes(word)
}

/// Reads a little-endian `u16` at `offset`. Callers check the length first.
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    let mut word = [0u8; 2];
    if let Some(src) = bytes.get(offset..offset + 2) {
        word.copy_from_slice(src);
    }
    u16::from_le_bytes(word)
}

fn ensure_len(bytes: &[u8], expected: usize) -> Result<(), FrameError> {
    if bytes.len() < expected {
        return Err(FrameError::Short {
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}
