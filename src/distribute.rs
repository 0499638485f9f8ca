//! Fan-out of an extracted batch to a newsletter's recipients.
//!
//! The whole batch is rendered into one digest and handed to the [`Notifier`]
//! once per recipient. Deliveries are independent: a failing recipient is
//! recorded in the [`DistributionReport`] and the remaining recipients are
//! still attempted.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::fmt::Write;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::errors::DeliveryError;
use crate::models::Record;
use crate::utils::escape_html;

/// Deliveries in flight at once for one firing.
const DELIVERY_CONCURRENCY: usize = 4;

/// A digest ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Outbound delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `payload` to a single recipient address.
    async fn send(&self, address: &str, payload: &RenderedMessage) -> Result<(), DeliveryError>;

    /// Human-readable name for this channel (e.g. "smtp", "log").
    fn channel_name(&self) -> &str;
}

/// Result of delivering the digest to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub recipient: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DeliveryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-recipient outcomes of one fan-out, in recipient order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DistributionReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// Send one digest of `records` to every address in `recipients`.
///
/// # Arguments
///
/// * `notifier` - Delivery channel
/// * `source_name` - Shown in the subject and heading
/// * `records` - The whole batch; every recipient gets all of it
/// * `recipients` - Snapshot of addresses taken when the firing started
///
/// # Returns
///
/// A [`DistributionReport`] with one outcome per recipient, in recipient
/// order. Failed deliveries are recorded there and never stop the others.
///
/// # Examples
///
/// ```ignore
/// let report = distribute(&LogNotifier, "Example", &records, &recipients).await;
/// assert_eq!(report.outcomes.len(), recipients.len());
/// ```
#[instrument(level = "info", skip_all, fields(channel = notifier.channel_name(), records = records.len(), recipients = recipients.len()))]
pub async fn distribute(
    notifier: &dyn Notifier,
    source_name: &str,
    records: &[Record],
    recipients: &[String],
) -> DistributionReport {
    if recipients.is_empty() {
        debug!("No recipients configured");
        return DistributionReport::default();
    }

    let payload = render_digest(source_name, records);
    let payload = &payload;

    let deliveries: Vec<_> = recipients
        .iter()
        .map(|recipient| deliver(notifier, recipient, payload))
        .collect();
    let outcomes: Vec<DeliveryOutcome> = stream::iter(deliveries)
        .buffered(DELIVERY_CONCURRENCY)
        .collect()
        .await;

    let report = DistributionReport { outcomes };
    info!(
        delivered = report.delivered(),
        failed = report.failed(),
        "Fan-out finished"
    );
    report
}

async fn deliver(
    notifier: &dyn Notifier,
    recipient: &str,
    payload: &RenderedMessage,
) -> DeliveryOutcome {
    let start = Instant::now();
    let result = notifier.send(recipient, payload).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            debug!(%recipient, duration_ms, "Digest delivered");
            DeliveryOutcome {
                recipient: recipient.to_string(),
                error: None,
                duration_ms,
            }
        }
        Err(e) => {
            warn!(%recipient, error = %e, duration_ms, "Digest delivery failed");
            DeliveryOutcome {
                recipient: recipient.to_string(),
                error: Some(e.to_string()),
                duration_ms,
            }
        }
    }
}

/// Render the digest for one batch: an HTML table with one row per record
/// plus a plain-text alternative.
pub fn render_digest(source_name: &str, records: &[Record]) -> RenderedMessage {
    let subject = format!("Latest from {} ({} articles)", source_name, records.len());

    let mut rows = String::new();
    for record in records {
        let _ = write!(
            rows,
            r#"<tr style="border-bottom: 1px solid #ddd;">
<td style="padding: 12px; text-align: center;"><img src="{image}" alt="" style="max-width: 100px; height: auto; border-radius: 4px;"></td>
<td style="padding: 12px;">
<h3 style="margin: 0 0 8px 0; color: #007BFF;">{title}</h3>
<p style="margin: 0; color: #666; font-size: 14px;">{description}</p>
<p style="margin: 4px 0 0 0; color: #999; font-size: 12px;">{published}</p>
<a href="{link}" style="color: #007BFF; text-decoration: none; font-size: 12px;">Read the article</a>
</td>
</tr>
"#,
            image = escape_html(record.image_url.trim()),
            title = escape_html(record.title.trim()),
            description = escape_html(record.description.trim()),
            published = escape_html(record.published_label.trim()),
            link = escape_html(record.article_url.trim()),
        );
    }

    let html_body = format!(
        r#"<html><body style="font-family: Arial, sans-serif; color: #333; margin: 0; padding: 20px;">
<div style="max-width: 800px; margin: 0 auto; background: #f9f9f9; padding: 20px; border-radius: 8px;">
<h1 style="color: #007BFF; text-align: center;">{name}</h1>
<table style="width: 100%; border-collapse: collapse; background: white;">
<tbody>
{rows}</tbody>
</table>
<p style="text-align: center; font-size: 12px; color: #888;">Total articles: <strong>{count}</strong></p>
</div>
</body></html>
"#,
        name = escape_html(source_name),
        rows = rows,
        count = records.len(),
    );

    let text_body = records
        .iter()
        .map(|r| {
            let mut entry = r.title.trim().to_string();
            for extra in [&r.description, &r.published_label, &r.article_url] {
                let extra = extra.trim();
                if !extra.is_empty() {
                    entry.push_str("\n  ");
                    entry.push_str(extra);
                }
            }
            entry
        })
        .join("\n\n");
    let text_body = format!(
        "{}\n\n{}\n\nTotal articles: {}\n",
        source_name,
        text_body,
        records.len()
    );

    RenderedMessage {
        subject,
        html_body,
        text_body,
    }
}
