//! Daemon status codes.

use std::fmt;

/// Known status codes and their symbolic names.
const NAMED_CODES: &[(i32, &str, &str)] = &[
    (-1, "PI_INIT_FAILED", "daemon initialisation failed"),
    (-2, "PI_BAD_USER_GPIO", "gpio not 0-31"),
    (-3, "PI_BAD_GPIO", "gpio not 0-53"),
    (-4, "PI_BAD_MODE", "mode not 0-7"),
    (-24, "PI_NO_HANDLE", "no handle available"),
    (-25, "PI_BAD_HANDLE", "unknown handle"),
    (-41, "PI_NOT_PERMITTED", "gpio operation not permitted"),
    (-42, "PI_SOME_PERMITTED", "one or more gpios not permitted"),
    (-125, "PI_BAD_FILTER", "bad filter parameter"),
];

/// A negative status returned by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PigpioError {
    code: i32,
}

impl PigpioError {
    pub const INIT_FAILED: PigpioError = PigpioError { code: -1 };
    pub const BAD_USER_GPIO: PigpioError = PigpioError { code: -2 };
    pub const NO_HANDLE: PigpioError = PigpioError { code: -24 };
    pub const BAD_HANDLE: PigpioError = PigpioError { code: -25 };
    pub const NOT_PERMITTED: PigpioError = PigpioError { code: -41 };
    pub const BAD_FILTER: PigpioError = PigpioError { code: -125 };

    pub const fn from_code(code: i32) -> Self {
        Self { code }
    }

    /// The raw (negative) status code.
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Symbolic name such as `PI_BAD_HANDLE`, if the code is known.
    pub fn name(&self) -> Option<&'static str> {
        self.lookup().map(|(_, name, _)| *name)
    }

    fn lookup(&self) -> Option<&'static (i32, &'static str, &'static str)> {
        NAMED_CODES.iter().find(|(code, _, _)| *code == self.code)
    }
}

impl fmt::Display for PigpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lookup() {
            Some((code, name, text)) => write!(f, "{name} ({code}): {text}"),
            None => write!(f, "daemon error {}", self.code),
        }
    }
}

impl std::error::Error for PigpioError {}
