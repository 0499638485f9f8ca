//! JSON archive of extracted batches.
//!
//! Every successful extraction can be written out for later inspection:
//! ```text
//! json_output_dir/
//! └── gaming-hourly-actugaming/
//!     ├── 2025-05-06T08-00-00Z.json
//!     └── 2025-05-06T18-00-00Z.json
//! ```
//!
//! One directory per job (slugified id), one file per firing named after the
//! firing's start time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

use crate::models::{Record, Source};
use crate::utils::slugify;

/// File contents for one archived firing.
#[derive(Debug, Serialize)]
struct ArchivedBatch<'a> {
    job_id: &'a str,
    source_id: &'a str,
    source_name: &'a str,
    source_url: &'a str,
    fired_at: DateTime<Utc>,
    count: usize,
    records: &'a [Record],
}

/// Write one firing's records to `{json_output_dir}/{job}/{timestamp}.json`.
///
/// Returns the path written.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir, job_id = %job_id))]
pub async fn write_records(
    json_output_dir: &str,
    job_id: &str,
    fired_at: DateTime<Utc>,
    source: &Source,
    records: &[Record],
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let batch = ArchivedBatch {
        job_id,
        source_id: &source.id,
        source_name: &source.name,
        source_url: &source.url,
        fired_at,
        count: records.len(),
        records,
    };
    let json = serde_json::to_string_pretty(&batch)?;

    let job_dir = PathBuf::from(json_output_dir).join(slugify(job_id));
    if let Err(e) = fs::create_dir_all(&job_dir).await {
        error!(path = %job_dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let path = job_dir.join(format!("{}.json", fired_at.format("%Y-%m-%dT%H-%M-%SZ")));
    fs::write(&path, json).await?;
    info!(path = %path.display(), count = records.len(), "Wrote JSON archive");

    Ok(path)
}
