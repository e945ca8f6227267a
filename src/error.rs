use std::{fmt, io, path::StripPrefixError};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum BuildError {
    #[error("Style compilation error: {0}")]
    Compile(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl From<StripPrefixError> for BuildError {
    fn from(src: StripPrefixError) -> BuildError {
        BuildError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for BuildError {
    fn from(src: toml::de::Error) -> BuildError {
        BuildError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for BuildError {
    fn from(src: toml::ser::Error) -> BuildError {
        BuildError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for BuildError {
    fn from(src: JsonError) -> BuildError {
        BuildError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for BuildError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => BuildError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => BuildError::PermissionDenied,
            _ => BuildError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<walkdir::Error> for BuildError {
    fn from(x: walkdir::Error) -> Self {
        match x.into_io_error() {
            Some(io_error) => BuildError::from(io_error),
            None => BuildError::Io("Filesystem loop detected while walking directories".into()),
        }
    }
}

impl From<fmt::Error> for BuildError {
    fn from(x: fmt::Error) -> Self {
        BuildError::Custom(format!("{x}"))
    }
}

impl From<RegexError> for BuildError {
    fn from(x: RegexError) -> Self {
        BuildError::Serialization(format!("Regex parse failed: {x}"))
    }
}
