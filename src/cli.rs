//! Command-line interface definitions for the digest scraper daemon.
//!
//! Every option can also be set through an environment variable, which is
//! the usual way to hand credentials to the process.

use clap::Parser;

use crate::fetch::RenderFailure;
use crate::registry::OverlapPolicy;

/// Runs scheduled scrapes and mails each batch to its newsletter.
///
/// # Examples
///
/// ```sh
/// # Log digests instead of sending them
/// digest_scraper -c jobs.yaml --dry-run
///
/// # Render premium sources through Browserless and mail results
/// digest_scraper -c jobs.yaml \
///     --browserless-url http://localhost:3000 \
///     --smtp-host smtp.example.com --smtp-from "Digest <digest@example.com>"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the jobs file (newsletters, sources, schedules)
    #[arg(short, long, env = "DIGEST_CONFIG")]
    pub config: String,

    /// Base URL of a Browserless service used for premium sources
    #[arg(long, env = "BROWSERLESS_URL")]
    pub browserless_url: Option<String>,

    /// Browserless API token
    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    pub browserless_token: Option<String>,

    /// Upper bound on one headless render, in seconds
    #[arg(long, default_value_t = 30)]
    pub render_timeout_secs: u64,

    /// Pause after the page body is ready, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub settle_delay_ms: u64,

    /// What a failed headless render produces
    #[arg(long, value_enum, default_value_t = RenderFailure::EmptyDocument)]
    pub render_failure: RenderFailure,

    /// Timeout for plain page requests, in seconds
    #[arg(long, default_value_t = 20)]
    pub request_timeout_secs: u64,

    /// SMTP relay host; without it digests are only logged
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP port (465 for implicit TLS, otherwise STARTTLS)
    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    /// Sender mailbox
    #[arg(long, env = "SMTP_FROM", default_value = "Digest <digest@localhost>")]
    pub smtp_from: String,

    #[arg(long, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    /// Log digests instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Send a digest even when a firing extracted nothing
    #[arg(long)]
    pub send_empty: bool,

    /// Archive every extracted batch as JSON under this directory
    #[arg(short, long)]
    pub json_output_dir: Option<String>,

    /// Whether a job may fire again while its previous firing runs
    #[arg(long, value_enum, default_value_t = OverlapPolicy::Allow)]
    pub overlap: OverlapPolicy,

    /// Fetch retries after the first failed attempt
    #[arg(long, default_value_t = 2)]
    pub fetch_retries: usize,
}
