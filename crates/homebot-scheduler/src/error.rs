//! Error types for the scheduler.

use thiserror::Error;

use crate::OwnerId;

/// Failure reading timetable or homework data.
///
/// Never fatal for a run: the affected list degrades to empty.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The backing store could not be read or written.
    #[error("content store error: {0}")]
    Store(String),

    /// Record data was malformed.
    #[error("invalid content record: {0}")]
    Invalid(String),
}

/// Failure reading subscriber records.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store could not be read.
    #[error("subscriber store error: {0}")]
    Store(String),
}

/// Failure handing a message to the chat transport. Always retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport answered but refused the message.
    #[error("delivery rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The transport could not be reached.
    #[error("delivery transport error: {0}")]
    Transport(String),
}

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Subscriber lookup failed.
    #[error("subscriber lookup failed: {0}")]
    Repository(#[from] RepositoryError),

    /// Content lookup failed.
    #[error("content lookup failed: {0}")]
    Content(#[from] ContentError),

    /// Dispatch failed.
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Owner has no subscriber record.
    #[error("subscriber not found: {0}")]
    SubscriberNotFound(OwnerId),

    /// Owner turned notifications off.
    #[error("notifications disabled for subscriber {0}")]
    SubscriberDisabled(OwnerId),
}
