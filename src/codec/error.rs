// Codec Error Types
use core::fmt;

/// - `Again`: 类似 `EAGAIN`，提示调用方先驱动对端（receive_* 或再次 send_*）
/// - `Eof`:  类似 `AVERROR_EOF`，drain 之后不再有输出
///
/// 两者都不是故障，而是 send/receive 状态机的正常换向信号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Again,
    Eof,

    InvalidState(&'static str),
    InvalidData(&'static str),
    Unsupported(&'static str),

    Other(String),
}

impl CodecError {
    pub const fn is_again(&self) -> bool {
        matches!(self, CodecError::Again)
    }

    pub const fn is_eof(&self) -> bool {
        matches!(self, CodecError::Eof)
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Again => write!(f, "again (EAGAIN): need to drive codec state machine"),
            CodecError::Eof => write!(f, "end of stream (EOF)"),
            CodecError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            CodecError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            CodecError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            CodecError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = Result<T, CodecError>;
