use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Failures that stop the HTTP server. Handlers never fail: a streaming
/// client is never shown an error, its stream just ends.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The listen address could not be bound.
    Bind,
    /// The server loop ended with an I/O error.
    Serve,
}

impl Error {
    pub fn bind(err: std::io::Error) -> Self {
        Self {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Bind,
        }
    }

    pub fn serve(err: std::io::Error) -> Self {
        Self {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Serve,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self.error_kind {
            ErrorKind::Bind => "Failed to bind listen address",
            ErrorKind::Serve => "Server stopped unexpectedly",
        };
        match &self.source {
            Some(source) => write!(f, "{what}: {source}"),
            None => write!(f, "{what}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
