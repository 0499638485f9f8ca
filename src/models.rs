//! Data models shared by the registry, the extractor and the fan-out stage.
//!
//! - [`Source`]: where to fetch from and how to read the page ([`SelectorSchema`])
//! - [`Record`]: one item extracted from a source document
//! - [`JobConfig`]: a {source, cadence, recipients} binding handed to the scheduler
//! - [`JobView`]: read-only snapshot of a registered job
//!
//! A [`SelectorSchema`] can only exist in validated form: every selector is
//! non-empty and compiles, so extraction never has to deal with a bad schema.

use chrono::{DateTime, Utc};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SchemaError;

/// Identifier of a registered job.
pub type JobId = String;

/// Raw selector strings as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFields {
    pub container: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub time: String,
    pub link: String,
}

/// A validated, compiled selector set for one source's document shape.
///
/// Build it with [`SelectorSchema::new`] or `SelectorSchema::try_from(fields)`;
/// deserialization goes through the same validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaFields", into = "SchemaFields")]
pub struct SelectorSchema {
    fields: SchemaFields,
    pub(crate) container: Selector,
    pub(crate) title: Selector,
    pub(crate) description: Selector,
    pub(crate) image: Selector,
    pub(crate) time: Selector,
    pub(crate) link: Selector,
}

impl SelectorSchema {
    /// Validate and compile the six selectors, in
    /// container/title/description/image/time/link order.
    pub fn new(
        container: &str,
        title: &str,
        description: &str,
        image: &str,
        time: &str,
        link: &str,
    ) -> Result<Self, SchemaError> {
        Self::try_from(SchemaFields {
            container: container.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            image: image.to_string(),
            time: time.to_string(),
            link: link.to_string(),
        })
    }

    /// The selector strings this schema was built from.
    pub fn fields(&self) -> &SchemaFields {
        &self.fields
    }
}

fn compile(field: &'static str, selector: &str) -> Result<Selector, SchemaError> {
    if selector.trim().is_empty() {
        return Err(SchemaError::EmptyField { field });
    }
    Selector::parse(selector).map_err(|e| SchemaError::InvalidSelector {
        field,
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl TryFrom<SchemaFields> for SelectorSchema {
    type Error = SchemaError;

    fn try_from(fields: SchemaFields) -> Result<Self, Self::Error> {
        Ok(Self {
            container: compile("container", &fields.container)?,
            title: compile("title", &fields.title)?,
            description: compile("description", &fields.description)?,
            image: compile("image", &fields.image)?,
            time: compile("time", &fields.time)?,
            link: compile("link", &fields.link)?,
            fields,
        })
    }
}

impl From<SelectorSchema> for SchemaFields {
    fn from(schema: SelectorSchema) -> Self {
        schema.fields
    }
}

impl PartialEq for SelectorSchema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

/// A content source bound to one selector schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    /// Page the records are scraped from. Its host is also the origin that
    /// relative image and link URLs are resolved against.
    pub url: String,
    /// Page needs a full headless render (script-heavy markup).
    #[serde(default, alias = "premium")]
    pub render_required: bool,
    pub schema: SelectorSchema,
}

/// Document text handed from the fetch stage to the extractor.
///
/// An empty document means "nothing to extract", not a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    body: String,
}

impl RawDocument {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }
}

/// One extracted item. `image_url` and `article_url` are absolute when
/// non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub published_label: String,
    pub article_url: String,
}

/// Everything the scheduler needs to register one recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: JobId,
    pub name: String,
    /// `@every 1h30m`, a 5/6-field cron line, or a cron descriptor like `@daily`.
    pub cadence: String,
    pub source: Source,
    /// Resolved recipient addresses of the source's newsletter.
    pub recipients: Vec<String>,
}

/// Run status of a job. Cycles `Running -> Completed|Error -> Running ...`
/// until the job is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Stopped,
    Running,
    Completed,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Stopped => "stopped",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Summary of the most recent finished firing of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiringSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub error: Option<String>,
}

/// Read-only view of a registered job, as returned by `list`/`get`.
///
/// `next_run_at` is read from the job's timer when the view is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub name: String,
    pub cadence: String,
    pub source_id: String,
    pub source_name: String,
    pub status: JobStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub schedule_handle: u64,
    pub last_firing: Option<FiringSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_schema() -> SelectorSchema {
        SelectorSchema::new("div.card", "h3", "p", "img", "time", "a").unwrap()
    }

    #[test]
    fn test_schema_rejects_empty_field() {
        let err = SelectorSchema::new("div.card", "h3", "", "img", "time", "a").unwrap_err();
        assert_eq!(
            err,
            SchemaError::EmptyField {
                field: "description"
            }
        );
    }

    #[test]
    fn test_schema_rejects_whitespace_field() {
        let err = SelectorSchema::new("  ", "h3", "p", "img", "time", "a").unwrap_err();
        assert_eq!(err, SchemaError::EmptyField { field: "container" });
    }

    #[test]
    fn test_schema_rejects_unparseable_selector() {
        let err = SelectorSchema::new("div.card", "h3[", "p", "img", "time", "a").unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidSelector { field: "title", .. }
        ));
    }

    #[test]
    fn test_schema_deserialization_validates() {
        let yaml = "container: li\ntitle: h2 a\ndescription: ''\nimage: img\ntime: span\nlink: h2 a\n";
        let parsed: Result<SelectorSchema, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());

        let yaml = "container: li\ntitle: h2 a\ndescription: div\nimage: img\ntime: span\nlink: h2 a\n";
        let schema: SelectorSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.fields().title, "h2 a");
    }

    #[test]
    fn test_source_accepts_premium_alias() {
        let json = serde_json::json!({
            "id": "jv",
            "name": "Jeux Video",
            "url": "https://www.jeuxvideo.com/news/",
            "premium": true,
            "schema": serde_json::to_value(card_schema()).unwrap(),
        });
        let source: Source = serde_json::from_value(json).unwrap();
        assert!(source.render_required);
        assert_eq!(source.schema, card_schema());
    }

    #[test]
    fn test_raw_document_whitespace_is_empty() {
        assert!(RawDocument::new("  \n\t").is_empty());
        assert!(RawDocument::empty().is_empty());
        assert!(!RawDocument::new("<html></html>").is_empty());
    }

    #[test]
    fn test_job_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(JobStatus::Running.to_string(), "running");
    }
}
