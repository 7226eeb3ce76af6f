//! Error types for station metadata decoding, validation and encoding.

use thiserror::Error;

use crate::types::Format;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("malformed SEED record {record} at byte offset {offset}: {reason}")]
    MalformedRecord {
        record: u32,
        offset: usize,
        reason: String,
    },

    #[error("invalid field in blockette {blockette:03}: {reason}")]
    InvalidField { blockette: u16, reason: String },

    #[error("value {value} does not fit field {field} of blockette {blockette:03}")]
    FieldOverflow {
        blockette: u16,
        field: &'static str,
        value: String,
    },

    #[error("RESP format error on line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("StationXML schema error: {0}")]
    Schema(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("structure error: {0}")]
    Structure(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unrecognized metadata format")]
    UnrecognizedFormat,

    #[error("writing {0} is not supported")]
    WriteUnsupported(Format),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    /// True for field-level failures caused by a blockette running out of
    /// bytes, i.e. its length header disagrees with its content.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::InvalidField { reason, .. } if reason.starts_with("truncated"))
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
