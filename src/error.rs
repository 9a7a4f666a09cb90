use std::fmt;
use std::path::PathBuf;

/// Typed error taxonomy for the core engine (see `SPEC_FULL.md` §7).
///
/// Leaf call sites still use `anyhow!`/`.context(...)` for ad-hoc plumbing;
/// this type exists so callers that need to branch on failure kind can
/// `downcast_ref::<Error>()` an `anyhow::Error`.
#[derive(Debug, Clone)]
pub enum Error {
    InvalidFormat { path: Option<PathBuf>, message: String },
    UnsupportedVersion { path: Option<PathBuf>, message: String },
    KeyNotFound { path: String },
    ValueNotFound { key: String },
    InvalidType { key: String, expected: &'static str },
    ParseError { rule: Option<String>, message: String },
    Io { message: String },
    Configuration { message: String },
}

impl Error {
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Error::InvalidFormat { path: None, message: message.into() }
    }

    pub fn unsupported_version(message: impl Into<String>) -> Self {
        Error::UnsupportedVersion { path: None, message: message.into() }
    }

    pub fn parse(rule: Option<String>, message: impl Into<String>) -> Self {
        Error::ParseError { rule, message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration { message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidFormat { path, message } => match path {
                Some(p) => write!(f, "invalid format ({}): {message}", p.display()),
                None => write!(f, "invalid format: {message}"),
            },
            Error::UnsupportedVersion { path, message } => match path {
                Some(p) => write!(f, "unsupported version ({}): {message}", p.display()),
                None => write!(f, "unsupported version: {message}"),
            },
            Error::KeyNotFound { path } => write!(f, "registry key not found: {path}"),
            Error::ValueNotFound { key } => write!(f, "registry value not found: {key}"),
            Error::InvalidType { key, expected } => {
                write!(f, "registry value {key} is not a valid {expected}")
            }
            Error::ParseError { rule, message } => match rule {
                Some(r) => write!(f, "failed to parse rule '{r}': {message}"),
                None => write!(f, "parse error: {message}"),
            },
            Error::Io { message } => write!(f, "io error: {message}"),
            Error::Configuration { message } => write!(f, "configuration error: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io { message: e.to_string() }
    }
}
