//! Retention Engine — re-engagement automation for a subscription product.
//!
//! Main entry point: wires the store, personalizer and messenger, then
//! runs the three scheduled jobs (trigger matching, queue processing,
//! activity watching).

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use retention_core::config::AppConfig;
use retention_core::store::{seed_demo, InMemoryStore, RetentionStore};
use retention_delivery::{Messenger, TelegramMessenger};
use retention_matcher::TriggerMatcher;
use retention_personalization::personalizer_from_config;
use retention_queue::{ActivityWatcher, QueueProcessor};
use retention_reporting::Reporter;

#[derive(Parser, Debug)]
#[command(name = "retention-engine")]
#[command(about = "Re-engagement automation engine for a subscription product")]
#[command(version)]
struct Cli {
    /// Queue processor interval in seconds (overrides config)
    #[arg(long, env = "RETENTION_ENGINE__ENGINE__QUEUE_INTERVAL_SECS")]
    queue_interval: Option<u64>,

    /// Trigger matcher interval in seconds (overrides config)
    #[arg(long, env = "RETENTION_ENGINE__ENGINE__MATCHER_INTERVAL_SECS")]
    matcher_interval: Option<u64>,

    /// Max queue entries per processing pass (overrides config)
    #[arg(long, env = "RETENTION_ENGINE__ENGINE__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Run one cycle of each job, print reports, and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Skip seeding the demo triggers and users
    #[arg(long, default_value_t = false)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retention_engine=info,retention_queue=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Retention Engine starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(secs) = cli.queue_interval {
        config.engine.queue_interval_secs = secs;
    }
    if let Some(secs) = cli.matcher_interval {
        config.engine.matcher_interval_secs = secs;
    }
    if let Some(batch) = cli.batch_size {
        config.engine.batch_size = batch;
    }

    info!(
        matcher_interval_secs = config.engine.matcher_interval_secs,
        queue_interval_secs = config.engine.queue_interval_secs,
        watcher_interval_secs = config.engine.watcher_interval_secs,
        batch_size = config.engine.batch_size,
        "Configuration loaded"
    );

    let memory_store = Arc::new(InMemoryStore::new());
    if !cli.no_seed {
        seed_demo(&memory_store)?;
        info!("Seeded demo triggers and users");
    }
    let store: Arc<dyn RetentionStore> = memory_store;

    let personalizer = personalizer_from_config(&config.ai);
    if config.ai.api_key.is_empty() {
        info!("No AI api key configured, using heuristic personalizer");
    } else {
        info!(model = %config.ai.model, "Using model-backed personalizer");
    }
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(config.telegram.clone()));

    let matcher = TriggerMatcher::new(store.clone(), config.engine.clone());
    let processor = QueueProcessor::new(
        store.clone(),
        personalizer,
        messenger,
        config.clone(),
    );
    let watcher = ActivityWatcher::new(store.clone(), config.engine.clone());
    let reporter = Reporter::new(store.clone());

    if cli.once {
        let matched = matcher.check_triggers().await;
        let processed = processor.process_queue().await;
        let cancelled = watcher.cancel_if_active().await;
        info!(
            enqueued = matched.enqueued,
            sent = processed.sent,
            failed = processed.failed,
            cancelled = cancelled.cancelled,
            "Single cycle complete"
        );
        for report in reporter.report_all() {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        return Ok(());
    }

    let mut matcher_tick =
        tokio::time::interval(std::time::Duration::from_secs(config.engine.matcher_interval_secs));
    let mut queue_tick =
        tokio::time::interval(std::time::Duration::from_secs(config.engine.queue_interval_secs));
    let mut watcher_tick =
        tokio::time::interval(std::time::Duration::from_secs(config.engine.watcher_interval_secs));

    info!("Scheduler running, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = matcher_tick.tick() => {
                let summary = matcher.check_triggers().await;
                if !summary.errors.is_empty() {
                    tracing::warn!(errors = ?summary.errors, "Trigger matching reported errors");
                }
            }
            _ = queue_tick.tick() => {
                let summary = processor.process_queue().await;
                if !summary.errors.is_empty() {
                    tracing::warn!(errors = ?summary.errors, "Queue processing reported errors");
                }
            }
            _ = watcher_tick.tick() => {
                watcher.cancel_if_active().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
