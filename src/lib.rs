//! # Digest Scraper
//!
//! Scheduled scraping of news sources, turned into email digests.
//!
//! Each job binds one [`Source`](models::Source) to a cadence and a list of
//! recipients. When a job fires, the pipeline runs:
//! 1. **Fetch**: plain GET, or a headless render for script-heavy sources
//! 2. **Extract**: the source's selector schema turns the page into records
//! 3. **Distribute**: one digest of the whole batch per recipient
//!
//! The [`Scheduler`](scheduler::Scheduler) is the admin surface: jobs can be
//! added, removed, listed and fired by hand while timers are running.

pub mod cadence;
pub mod cli;
pub mod config;
pub mod distribute;
pub mod errors;
pub mod extractor;
pub mod fetch;
pub mod models;
pub mod notifiers;
pub mod outputs;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod utils;

pub use distribute::{DistributionReport, Notifier, RenderedMessage};
pub use errors::{
    ConfigError, DeliveryError, FetchError, NotFoundError, ParseError, PipelineError,
    ScheduleError, SchemaError,
};
pub use fetch::FetchGateway;
pub use models::{JobConfig, JobStatus, JobView, Record, SelectorSchema, Source};
pub use registry::OverlapPolicy;
pub use scheduler::{FiringOutcome, Repository, Scheduler, SchedulerSettings};
