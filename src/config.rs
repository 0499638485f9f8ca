//! Jobs file loading.
//!
//! The jobs file is YAML with three lists that reference each other by id:
//!
//! ```yaml
//! newsletters:
//!   - id: gaming
//!     name: Gaming digest
//!     recipients: [reader@example.com]
//! sources:
//!   - id: actugaming
//!     name: ActuGaming
//!     url: https://www.actugaming.net/
//!     premium: false
//!     schema:
//!       container: article.post
//!       title: h2.entry-title
//!       description: div.entry-summary
//!       image: img
//!       time: time
//!       link: h2.entry-title a
//! schedules:
//!   - id: gaming-morning
//!     name: Morning gaming news
//!     cadence: "0 8 * * *"
//!     newsletter: gaming
//!     sources: [actugaming]
//! ```
//!
//! Every (schedule, source) pair becomes one [`JobConfig`] with id
//! `"<schedule-id>:<source-id>"` and the schedule's newsletter recipients.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use url::Url;

use crate::errors::ConfigError;
use crate::models::{JobConfig, Source};
use crate::scheduler::Repository;

#[derive(Debug, Clone, Deserialize)]
pub struct NewsletterEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub name: String,
    pub cadence: String,
    pub newsletter: String,
    pub sources: Vec<String>,
}

/// Parsed, not yet cross-checked, jobs file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsFile {
    #[serde(default)]
    pub newsletters: Vec<NewsletterEntry>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
}

/// Parse a jobs file and expand it into job configurations.
///
/// Selector schemas are validated while deserializing. Cadences are not
/// checked here; the registry rejects bad ones job by job.
pub fn parse_jobs_file(text: &str) -> Result<Vec<JobConfig>, ConfigError> {
    let file: JobsFile = serde_yaml::from_str(text)?;
    expand(file)
}

fn expand(file: JobsFile) -> Result<Vec<JobConfig>, ConfigError> {
    ensure_unique("newsletter", file.newsletters.iter().map(|n| n.id.as_str()))?;
    ensure_unique("source", file.sources.iter().map(|s| s.id.as_str()))?;
    ensure_unique("schedule", file.schedules.iter().map(|s| s.id.as_str()))?;

    for source in &file.sources {
        validate_url(source)?;
    }

    let newsletters: HashMap<&str, &NewsletterEntry> =
        file.newsletters.iter().map(|n| (n.id.as_str(), n)).collect();
    let sources: HashMap<&str, &Source> =
        file.sources.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut jobs = Vec::new();
    for schedule in &file.schedules {
        let newsletter = newsletters.get(schedule.newsletter.as_str()).ok_or_else(|| {
            ConfigError::UnknownNewsletter {
                schedule: schedule.id.clone(),
                newsletter: schedule.newsletter.clone(),
            }
        })?;

        for source_id in &schedule.sources {
            let source = sources
                .get(source_id.as_str())
                .ok_or_else(|| ConfigError::UnknownSource {
                    schedule: schedule.id.clone(),
                    source_id: source_id.clone(),
                })?;

            jobs.push(JobConfig {
                id: format!("{}:{}", schedule.id, source.id),
                name: format!("{} ({})", schedule.name, source.name),
                cadence: schedule.cadence.clone(),
                source: (*source).clone(),
                recipients: newsletter.recipients.clone(),
            });
        }
    }

    debug!(
        newsletters = file.newsletters.len(),
        sources = file.sources.len(),
        schedules = file.schedules.len(),
        jobs = jobs.len(),
        "Expanded jobs file"
    );
    Ok(jobs)
}

fn ensure_unique<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::Duplicate {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_url(source: &Source) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        source_id: source.id.clone(),
        url: source.url.clone(),
        reason,
    };
    let parsed = Url::parse(&source.url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// [`Repository`] backed by a YAML jobs file, re-read on every call.
#[derive(Debug, Clone)]
pub struct FileRepository {
    path: PathBuf,
}

impl FileRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Repository for FileRepository {
    #[instrument(level = "info", skip(self), fields(path = %self.path.display()))]
    async fn list_jobs(&self) -> Result<Vec<JobConfig>, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        let jobs = parse_jobs_file(&text)?;
        info!(jobs = jobs.len(), "Read jobs file");
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOBS: &str = r#"
newsletters:
  - id: gaming
    name: Gaming
    description: Video game news
    recipients: [one@example.com, two@example.com]
  - id: empty
    name: Nobody yet
sources:
  - id: actugaming
    name: ActuGaming
    url: https://www.actugaming.net/
    schema:
      container: article
      title: h2
      description: p
      image: img
      time: time
      link: a
  - id: jeuxvideo
    name: Jeux Video
    url: https://www.jeuxvideo.com/news/
    premium: true
    schema:
      container: div.card
      title: h2 a
      description: p
      image: img
      time: span.date
      link: h2 a
schedules:
  - id: hourly
    name: Hourly
    cadence: "@every 1h"
    newsletter: gaming
    sources: [actugaming, jeuxvideo]
  - id: nightly
    name: Nightly
    cadence: "0 22 * * *"
    newsletter: empty
    sources: [jeuxvideo]
"#;

    #[test]
    fn test_each_schedule_source_pair_is_a_job() {
        let jobs = parse_jobs_file(JOBS).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["hourly:actugaming", "hourly:jeuxvideo", "nightly:jeuxvideo"]);

        assert_eq!(jobs[0].recipients, vec!["one@example.com", "two@example.com"]);
        assert!(!jobs[0].source.render_required);
        assert!(jobs[1].source.render_required);
        assert_eq!(jobs[1].name, "Hourly (Jeux Video)");
        assert!(jobs[2].recipients.is_empty());
        assert_eq!(jobs[2].cadence, "0 22 * * *");
    }

    #[test]
    fn test_unknown_references_are_rejected() {
        let text = JOBS.replace("newsletter: empty", "newsletter: missing");
        assert!(matches!(
            parse_jobs_file(&text).unwrap_err(),
            ConfigError::UnknownNewsletter { .. }
        ));

        let text = JOBS.replace("sources: [jeuxvideo]", "sources: [gamekult]");
        assert!(matches!(
            parse_jobs_file(&text).unwrap_err(),
            ConfigError::UnknownSource { source_id, .. } if source_id == "gamekult"
        ));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let text = JOBS.replace("id: nightly", "id: hourly");
        assert!(matches!(
            parse_jobs_file(&text).unwrap_err(),
            ConfigError::Duplicate { kind: "schedule", .. }
        ));
    }

    #[test]
    fn test_empty_selector_fails_load() {
        let text = JOBS.replace("time: span.date", "time: ''");
        assert!(matches!(parse_jobs_file(&text).unwrap_err(), ConfigError::Yaml(_)));
    }

    #[test]
    fn test_bad_source_url() {
        let text = JOBS.replace("https://www.actugaming.net/", "ftp://www.actugaming.net/");
        assert!(matches!(
            parse_jobs_file(&text).unwrap_err(),
            ConfigError::InvalidUrl { .. }
        ));
    }

    #[tokio::test]
    async fn test_file_repository_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("jobs.yaml");
        std::fs::write(&path, JOBS).unwrap();

        let jobs = FileRepository::new(&path).list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 3);
    }

    #[tokio::test]
    async fn test_file_repository_missing_file() {
        let err = FileRepository::new("/nonexistent/jobs.yaml")
            .list_jobs()
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
