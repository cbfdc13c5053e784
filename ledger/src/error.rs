use std::io;

use thiserror::Error;

use crate::hash::IdentifierKey;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid magic {found:?}")]
    BadMagic { found: [u8; 8] },
    #[error("unsupported format version {found}")]
    UnsupportedVersion { found: u64 },
    #[error("unexpected end of input while reading {section}")]
    Truncated { section: &'static str },
    #[error("cleared timestamp {seconds} for key {key:#018x} is out of range")]
    InvalidTimestamp { key: IdentifierKey, seconds: i64 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Maps a failed read in `section` to either a truncation or a plain io error.
    pub(crate) fn from_read(err: io::Error, section: &'static str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated { section }
        } else {
            CodecError::Io(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl LedgerError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        LedgerError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// True when the error is an io error of kind `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::Io(err) if err.kind() == io::ErrorKind::NotFound)
    }
}
