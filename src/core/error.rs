//! Purpose: Define the crate-wide error type and protocol error taxonomy.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Single error shape for transport, parse, and status-derived failures.
//! Invariants: 412 errors keep the server-reported library version when present.
//! Invariants: Status-derived errors keep the raw body for diagnosis.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Io,
    Indeterminate,
    Parse,
    PreconditionRequired,
    PreconditionFailed,
    NotFound,
    Validation,
    Forbidden,
    PayloadTooLarge,
    Unexpected,
}

impl ErrorKind {
    /// Maps a non-success HTTP status to the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::Validation,
            401 | 403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            412 => ErrorKind::PreconditionFailed,
            413 => ErrorKind::PayloadTooLarge,
            428 => ErrorKind::PreconditionRequired,
            _ => ErrorKind::Unexpected,
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    status: Option<u16>,
    body: Option<String>,
    library_version: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            status: None,
            body: None,
            library_version: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Library version reported by the server alongside the failure.
    pub fn library_version(&self) -> Option<u64> {
        self.library_version
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_library_version(mut self, version: u64) -> Self {
        self.library_version = Some(version);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        if let Some(version) = self.library_version {
            write!(f, " (library version: {version})")?;
        }
        if let Some(body) = &self.body {
            let body = body.trim();
            if !body.is_empty() {
                write!(f, " (body: {body})")?;
            }
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::PreconditionFailed => 4,
        ErrorKind::PreconditionRequired => 5,
        ErrorKind::Forbidden => 6,
        ErrorKind::Validation => 7,
        ErrorKind::PayloadTooLarge => 8,
        ErrorKind::Parse => 9,
        ErrorKind::Io => 10,
        ErrorKind::Indeterminate => 11,
        ErrorKind::Unexpected => 12,
    }
}
