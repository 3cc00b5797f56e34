pub mod common;
pub mod constants;
pub mod edns;
pub mod enums;
pub mod header;
mod packet;
pub mod question;
pub mod resource;
pub mod simd;
pub mod unified_parser;
pub mod util;
pub mod zero_copy;


pub use header::*;
pub use packet::*;
pub use question::*;
pub use resource::DNSResource;

use thiserror::Error;

/// Errors raised while reading or writing DNS wire format.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("invalid DNS header")]
    InvalidHeader,
    #[error("invalid DNS label")]
    InvalidLabel,
    #[error("invalid question section")]
    InvalidQuestionSection,
    #[error("invalid answer section")]
    InvalidAnswerSection,
    #[error("invalid authority section")]
    InvalidAuthoritySection,
    #[error("invalid additional section")]
    InvalidAdditionalSection,
    #[error("invalid bit stream: {0}")]
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::InvalidBitStream(err.to_string())
    }
}
