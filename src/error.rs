use thiserror::Error;

#[derive(Error, Debug)]
/// An enum representing all possible errors when reading, editing or writing a RARC archive
pub enum RarcError {
    #[error("Invalid archive magic: {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("Corrupt archive at offset {offset:#x}: {reason}")]
    CorruptArchive { offset: u64, reason: String },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid UTF file name at offset {offset:#x}")]
    InvalidFileName {
        offset: u64,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error(transparent)]
    ParseError(#[from] binread::Error),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, RarcError>;

impl RarcError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        RarcError::CorruptArchive {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_op(reason: impl Into<String>) -> Self {
        RarcError::InvalidOperation(reason.into())
    }
}
