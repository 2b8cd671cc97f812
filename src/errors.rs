use std::str::Utf8Error;

use log::error;
use snafu::Snafu;

pub use crate::errors::Error::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Argument '{name}' out of range: {value} (valid up to {max})
    ArgumentRange {
        name: &'static str,
        value: u32,
        max: u32,
    },
    /// Timed out waiting for a matching reply
    Timeout,
    /// Access denied: {info}
    Unauthorized { info: String },
    /// Transport I/O error: {info}
    TransportIo { info: String },
    /// Transport has not been opened
    NotConnected,
    /// Packed payload has odd length ({len})
    OddPackedLength { len: usize },
    /// Buffer too short: need {needed} bytes at offset {offset}, got {len}
    BufferTooShort {
        needed: usize,
        offset: usize,
        len: usize,
    },
    /// Unknown pin mode value: {value}
    UnknownPinMode { value: u8 },
    /// Invalid UTF-8 in device string: {source}
    InvalidString { source: Utf8Error },
    /// Background task failed: {info}
    TaskFailure { info: String },
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        error!("std::io error {:?}", error);
        match error.kind() {
            std::io::ErrorKind::PermissionDenied => Unauthorized {
                info: String::from("port is held by another process or access is denied"),
            },
            std::io::ErrorKind::TimedOut => Timeout,
            _ => TransportIo {
                info: error.to_string(),
            },
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        InvalidString { source: value }
    }
}
