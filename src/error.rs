// src/error.rs
//! Error taxonomy of the ingest pipeline.
//!
//! Fetch and parse errors stay local to one resource or record; a poll cycle joins
//! whatever its tasks reported into one [`CycleError`].

use std::fmt;

use thiserror::Error;

use crate::model::ResourceId;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource {resource}: throttled by remote (HTTP 429)")]
    RateLimited { resource: ResourceId },

    #[error("resource {resource}: unexpected HTTP status {status}")]
    Status { resource: ResourceId, status: u16 },

    #[error("resource {resource}: transport error: {source}")]
    Transport {
        resource: ResourceId,
        #[source]
        source: reqwest::Error,
    },

    #[error("resource {resource}: cancelled while waiting for the rate limiter")]
    Cancelled { resource: ResourceId },
}

impl FetchError {
    pub fn resource(&self) -> ResourceId {
        match self {
            Self::RateLimited { resource }
            | Self::Status { resource, .. }
            | Self::Transport { resource, .. }
            | Self::Cancelled { resource } => *resource,
        }
    }

    /// Throttling is the only outcome worth retrying on a later cycle as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("resource {resource}: payload is not a slot document: {message}")]
    Payload { resource: ResourceId, message: String },

    #[error("malformed staff record: {fragment}")]
    Record { fragment: String },

    #[error("staff name does not match `<lab> (<auditorium>) <name>`: {fragment:?}")]
    Name { fragment: String },

    #[error("unrecognised service type: {fragment:?}")]
    ServiceType { fragment: String },

    #[error("unparseable timestamp: {fragment:?}")]
    Timestamp { fragment: String },
}

impl ParseError {
    /// Payload-level failures fail the resource's task; record-level ones do not.
    pub fn is_payload(&self) -> bool {
        matches!(self, Self::Payload { .. })
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned HTTP status {0}")]
    Status(u16),

    #[error("invalid catalog selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("malformed catalog entry: {0}")]
    Malformed(String),

    #[error("catalog page contains no catalog elements")]
    Empty,
}

/// Why one resource's poll task produced no slots.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("resource {resource}: task aborted: {message}")]
    Aborted { resource: ResourceId, message: String },
}

/// Join of every task failure in one poll cycle.
#[derive(Debug)]
pub struct CycleError {
    pub total: usize,
    pub failures: Vec<TaskFailure>,
}

impl CycleError {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} resources failed",
            self.failures.len(),
            self.total
        )?;
        for fail in &self.failures {
            write!(f, "\n  - {fail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}
