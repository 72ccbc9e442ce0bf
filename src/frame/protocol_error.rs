use thiserror::Error;

use super::{FunctionCode, Header};

/// A response that does not belong to the request it answers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Response header {actual:?} does not match request header {expected:?}")]
    HeaderMismatch { expected: Header, actual: Header },
    #[error("Response function {actual} does not match request function {expected}")]
    FunctionMismatch {
        expected: FunctionCode,
        actual: FunctionCode,
    },
}
