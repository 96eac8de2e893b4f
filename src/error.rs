use thiserror::Error;

/// Every way a demo stream can be rejected as malformed.
///
/// The byte stream is treated as trusted-authentic: there is no local
/// recovery from any of these, `parse` simply aborts with the offset at
/// which the error occurred.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("bad magic at offset {offset}: expected \"HL2DEMO\\0\"")]
    BadMagic { offset: u64 },

    #[error("truncated read at offset {offset}: needed {needed} more byte(s)")]
    Truncated { offset: u64, needed: usize },

    #[error("bad command {cmd} at offset {offset}")]
    BadCommand { cmd: u8, offset: u64 },

    #[error("invalid schema at offset {offset}: {reason}")]
    SchemaInvalid { offset: u64, reason: String },

    #[error("unsupported string table encoding at offset {offset}: dictionary encoding requested")]
    UnsupportedEncoding { offset: u64 },

    #[error("bad delta at offset {offset}: {reason}")]
    BadDelta { offset: u64, reason: String },

    #[error("protobuf decode failed at offset {offset}: {source}")]
    ProtobufDecode {
        offset: u64,
        #[source]
        source: prost::DecodeError,
    },

    #[error("inconsistent parser state at offset {offset}: {reason}")]
    Inconsistent { offset: u64, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub(crate) fn truncated(offset: u64, needed: usize) -> Self {
        ParseError::Truncated { offset, needed }
    }

    pub(crate) fn schema_invalid(offset: u64, reason: impl Into<String>) -> Self {
        ParseError::SchemaInvalid {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_delta(offset: u64, reason: impl Into<String>) -> Self {
        ParseError::BadDelta {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent(offset: u64, reason: impl Into<String>) -> Self {
        ParseError::Inconsistent {
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
