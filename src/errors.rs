//! Error types for the scheduling and extraction pipeline.
//!
//! Registry mutations surface [`ScheduleError`] and [`NotFoundError`] to the
//! caller. Stage failures inside a firing ([`FetchError`], [`ParseError`]) are
//! folded into a [`PipelineError`] and recorded on the job instead of being
//! propagated. [`DeliveryError`]s are collected per recipient and never abort
//! a firing.

use thiserror::Error;

/// Rejected cadence or job registration.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid cadence expression '{expression}': {reason}")]
    InvalidCadence { expression: String, reason: String },

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
}

/// An operation referenced a job id the registry does not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job '{0}' not found")]
pub struct NotFoundError(pub String);

/// A selector schema failed validation at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("selector field '{field}' is empty")]
    EmptyField { field: &'static str },

    #[error("selector field '{field}' has invalid selector '{selector}': {reason}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
        reason: String,
    },
}

/// Retrieval of a source document failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("rendering {url} failed: {reason}")]
    Render { url: String, reason: String },
}

/// The fetched body could not be treated as a markup document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("document is not markup (starts with: {preview})")]
    NotMarkup { preview: String },
}

/// Delivery to a single recipient failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("invalid recipient address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("could not build message: {0}")]
    Message(String),

    #[error("transport failed: {0}")]
    Transport(String),
}

/// A stage failure that aborted one firing of a job.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Loading job definitions failed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed jobs file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("source '{source_id}' has an invalid url '{url}': {reason}")]
    InvalidUrl {
        source_id: String,
        url: String,
        reason: String,
    },

    #[error("{kind} id '{id}' is defined more than once")]
    Duplicate { kind: &'static str, id: String },

    #[error("schedule '{schedule}' references unknown newsletter '{newsletter}'")]
    UnknownNewsletter { schedule: String, newsletter: String },

    #[error("schedule '{schedule}' references unknown source '{source_id}'")]
    UnknownSource { schedule: String, source_id: String },

    #[error("repository backend failed: {0}")]
    Backend(String),
}
