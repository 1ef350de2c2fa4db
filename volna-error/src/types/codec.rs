use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки кодека межузловых кадров.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame does not start with the cluster magic")]
    BadMagic,

    #[error("unsupported protocol version {version}")]
    UnsupportedVersion { version: u16 },

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown frame tag 0x{tag:02x}")]
    UnknownFrame { tag: u8 },

    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for CodecError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadMagic | Self::UnknownFrame { .. } | Self::Malformed { .. } => {
                StatusCode::InvalidFrame
            }
            Self::UnsupportedVersion { .. } => StatusCode::UnsupportedVersion,
            Self::FrameTooLarge { .. } => StatusCode::SizeLimit,
            Self::InvalidUtf8 { .. } => StatusCode::InvalidUtf8,
            Self::Io(_) => StatusCode::Io,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display_and_code() {
        let err = CodecError::UnknownFrame { tag: 0x7f };
        assert_eq!(err.to_string(), "unknown frame tag 0x7f");
        assert_eq!(err.status_code(), StatusCode::InvalidFrame);
        assert!(CodecError::BadMagic.status_code().is_protocol_error());
    }

    #[test]
    fn test_from_io() {
        let err: CodecError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err.status_code(), StatusCode::Io);
    }
}
