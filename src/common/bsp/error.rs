use std::fmt::{self, Display};

use failure::{Backtrace, Context, Fail};

/// Error returned when a BSP file cannot be decoded.
#[derive(Debug)]
pub struct LoadError {
    inner: Context<LoadErrorKind>,
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        self.inner.get_context().clone()
    }
}

impl From<LoadErrorKind> for LoadError {
    fn from(kind: LoadErrorKind) -> Self {
        LoadError {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<LoadErrorKind>> for LoadError {
    fn from(inner: Context<LoadErrorKind>) -> Self {
        LoadError { inner }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        LoadErrorKind::Io {
            reason: err.to_string(),
        }
        .into()
    }
}

impl Fail for LoadError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum LoadErrorKind {
    #[fail(display = "I/O error reading map file: {}", reason)]
    Io { reason: String },

    #[fail(display = "file is too small to contain a BSP header ({} bytes)", len)]
    Truncated { len: usize },

    #[fail(display = "bad magic number: expected \"IBSP\", found {:?}", found)]
    BadMagic { found: [u8; 4] },

    #[fail(display = "unsupported BSP version: expected 46, found {}", found)]
    BadVersion { found: i32 },

    #[fail(
        display = "lump {} offset/length ({}, {}) falls outside the file ({} bytes)",
        lump, offset, len, file_len
    )]
    LumpOutOfRange {
        lump: &'static str,
        offset: usize,
        len: usize,
        file_len: usize,
    },

    #[fail(
        display = "lump {} length {} is not a multiple of its record size {}",
        lump, len, record_size
    )]
    MisalignedRecord {
        lump: &'static str,
        len: usize,
        record_size: usize,
    },
}
