//! Error types for the `events` crate.
//!
//! Follows the layered pattern used across the workspace: a root `Error`
//! struct holding an `error_kind` tree and an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors raised at the collaborator seams.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// A channel name that cannot be used on the wire.
    InvalidChannel,
    /// The history store could not be reached. Never fatal for a session.
    StoreUnavailable,
    /// The pub/sub source failed.
    Subscription(SubscriptionErrorKind),
}

#[derive(Debug, PartialEq)]
pub enum SubscriptionErrorKind {
    ConnectFailed,
    SubscribeFailed,
}

impl Error {
    pub fn invalid_channel(name: &str) -> Self {
        Error {
            source: Some(format!("invalid channel name {name:?}").into()),
            error_kind: ErrorKind::InvalidChannel,
        }
    }

    pub fn store_unavailable<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error {
            source: Some(err.into()),
            error_kind: ErrorKind::StoreUnavailable,
        }
    }

    pub fn connect_failed<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error {
            source: Some(err.into()),
            error_kind: ErrorKind::Subscription(SubscriptionErrorKind::ConnectFailed),
        }
    }

    pub fn subscribe_failed<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Error {
            source: Some(err.into()),
            error_kind: ErrorKind::Subscription(SubscriptionErrorKind::SubscribeFailed),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::InvalidChannel => write!(f, "Invalid channel")?,
            ErrorKind::StoreUnavailable => write!(f, "History store unavailable")?,
            ErrorKind::Subscription(kind) => write!(f, "Subscription error: {kind:?}")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
