//! # Digest Scraper daemon
//!
//! Loads the jobs file, starts one timer per (schedule, source) pair and runs
//! until interrupted.
//!
//! ```sh
//! RUST_LOG=digest_scraper=debug digest_scraper -c jobs.yaml --dry-run
//! ```

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use digest_scraper::cli::Cli;
use digest_scraper::config::FileRepository;
use digest_scraper::distribute::Notifier;
use digest_scraper::fetch::{BrowserlessRenderer, HttpGateway, RenderSettings};
use digest_scraper::notifiers::{LogNotifier, SmtpNotifier, SmtpSettings};
use digest_scraper::retry::RetryPolicy;
use digest_scraper::scheduler::{Scheduler, SchedulerSettings};
use digest_scraper::utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "digest_scraper starting up");

    let args = Cli::parse();
    debug!(config = %args.config, json_output_dir = ?args.json_output_dir, dry_run = args.dry_run, "Parsed CLI arguments");

    // Early check: archive dir must be writable before any job fires
    if let Some(ref dir) = args.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir,
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    // ---- Fetch gateway ----
    let renderer = match args.browserless_url {
        Some(ref base_url) => {
            info!(%base_url, timeout_secs = args.render_timeout_secs, "Headless rendering enabled");
            Some(BrowserlessRenderer::new(RenderSettings {
                base_url: base_url.clone(),
                token: args.browserless_token.clone(),
                timeout: Duration::from_secs(args.render_timeout_secs),
                settle_delay: Duration::from_millis(args.settle_delay_ms),
            })?)
        }
        None => {
            warn!("No rendering service configured; premium sources will not render");
            None
        }
    };
    let gateway = HttpGateway::new(
        Duration::from_secs(args.request_timeout_secs),
        renderer,
        args.render_failure,
    )?;

    // ---- Notifier ----
    let notifier: Arc<dyn Notifier> = match (&args.smtp_host, args.dry_run) {
        (Some(host), false) => {
            let smtp = SmtpNotifier::from_settings(&SmtpSettings {
                host: host.clone(),
                port: args.smtp_port,
                from: args.smtp_from.clone(),
                username: args.smtp_username.clone(),
                password: args.smtp_password.clone(),
            })?;
            info!(%host, port = args.smtp_port, "Delivering digests over SMTP");
            Arc::new(smtp)
        }
        (None, false) => {
            warn!("No SMTP host configured; digests will only be logged");
            Arc::new(LogNotifier)
        }
        (_, true) => {
            info!("Dry run: digests will only be logged");
            Arc::new(LogNotifier)
        }
    };

    // ---- Scheduler ----
    let scheduler = Scheduler::new(
        Arc::new(gateway),
        notifier,
        SchedulerSettings {
            overlap: args.overlap,
            retry: RetryPolicy {
                max_retries: args.fetch_retries,
                ..RetryPolicy::default()
            },
            send_empty_digest: args.send_empty,
            archive_dir: args.json_output_dir.clone(),
        },
    );

    let repository = Arc::new(FileRepository::new(&args.config));
    let summary = scheduler.start(repository).await??;
    if summary.registered.is_empty() {
        warn!(config = %args.config, "No jobs registered; waiting anyway");
    }
    for view in scheduler.list_jobs().await {
        info!(
            job_id = %view.id,
            cadence = %view.cadence,
            source = %view.source_name,
            next_run_at = ?view.next_run_at,
            "Scheduled"
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received; shutting down");
    scheduler.shutdown().await;

    Ok(())
}
