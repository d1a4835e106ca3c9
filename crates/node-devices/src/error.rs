use crate::RegisterType;
use thiserror::Error;

pub type Result<T, E = NodeError> = core::result::Result<T, E>;

/// Malformed register or identity records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("record length {actual}, expected {expected}")]
    Length { expected: usize, actual: usize },
    #[error("unknown register type tag {0}")]
    UnknownType(u8),
    #[error("{count} elements of {ty} do not fit the register payload")]
    Overflow { ty: RegisterType, count: usize },
    #[error("register string is not valid UTF-8")]
    Text,
}

#[derive(Debug, Error)]
pub enum NodeError {
    /// Errno reported by the transport, already made positive.
    #[error("transport error {0}")]
    Internal(i32),
    #[error("wrong node: expected {expected}, found {actual}")]
    WrongNode { expected: String, actual: String },
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("register {register} returned {actual}, expected {expected}")]
    UnexpectedType {
        register: String,
        expected: RegisterType,
        actual: RegisterType,
    },
    #[error("value {value} for {register} outside {min}..={max}")]
    InvalidArgument {
        register: String,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("operation not supported by this device: {0}")]
    Unsupported(&'static str),
}

impl NodeError {
    /// Map a negative transport status code to an error; non-negative codes pass.
    pub(crate) fn check(code: i32) -> Result<()> {
        if code < 0 {
            Err(NodeError::Internal(-code))
        } else {
            Ok(())
        }
    }
}
