//! Functionality for handling time zones and time zone information files (TZIF).
pub(crate) mod posix;
pub mod store;
pub(crate) mod tzif;
pub mod zone;

use std::fmt;

/// Everything that can go wrong loading or querying a time zone.
///
/// No error is retried internally, and a partially decoded zone is never
/// observable: construction either yields a fully valid zone or fails.
#[derive(Debug)]
pub enum Error {
    /// The stream does not start with the TZif magic bytes.
    BadMagic,
    /// The version byte is not one this crate can interpret.
    BadVersion(u8),
    /// The stream ended before the structure it promised.
    ShortRead { offset: usize },
    /// A structurally invalid body field.
    MalformedBody {
        offset: usize,
        what: &'static str,
    },
    /// A malformed POSIX TZ trailer, with the offending text.
    BadTzString(String),
    /// A zone key that is empty, non-ASCII, or could escape the search path.
    BadKey(String),
    /// No file for the key on any search path.
    NotFound(String),
    /// A candidate file exists but could not be read.
    Io(std::io::Error),
    /// Civil-time arithmetic left the supported year range.
    OutOfRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic => write!(f, "not a TZif file (bad magic value)"),
            Error::BadVersion(v) => write!(f, "unsupported TZif version byte {v:#04x}"),
            Error::ShortRead { offset } => {
                write!(f, "TZif stream truncated at byte {offset}")
            }
            Error::MalformedBody { offset, what } => {
                write!(f, "malformed TZif body at byte {offset}: {what}")
            }
            Error::BadTzString(s) => write!(f, "invalid POSIX TZ string {s:?}"),
            Error::BadKey(key) => write!(f, "invalid time zone key {key:?}"),
            Error::NotFound(key) => write!(f, "no time zone found with key {key:?}"),
            Error::Io(e) => write!(f, "could not read time zone file: {e}"),
            Error::OutOfRange => write!(f, "date value out of range"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
