//! pagewatch - sharded page-watching scheduler.
//!
//! Runs the cycle against the in-memory store; a deployment swaps in
//! a real document store behind the same traits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagewatch::config::Settings;
use pagewatch::identity::IdentityRotator;
use pagewatch::queue::{QueueRegistry, RegistryWorkers};
use pagewatch::scheduler::Scheduler;
use pagewatch::stats::Stats;
use pagewatch::store::{CachedTemplates, MemoryStore, StatsStore, TemplateStore, UserStore};
use pagewatch::workers::{
    BrowserFetchWorker, HttpFetchWorker, PersistWorker, ProxyHarvestWorker, Worker,
};

#[derive(Parser)]
#[command(name = "pagewatch", about = "Sharded page-watching scheduler")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PAGEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let default_filter = if cli.verbose {
        "pagewatch=info"
    } else {
        "pagewatch=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load_or_default(cli.config.as_deref())?;

    let store = Arc::new(MemoryStore::new());
    let users: Arc<dyn UserStore> = store.clone();
    let templates = Arc::new(CachedTemplates::new(
        store.clone() as Arc<dyn TemplateStore>
    ));
    let stats_store: Arc<dyn StatsStore> = store.clone();

    let stats = match Stats::load(store.as_ref()).await {
        Ok(stats) => Arc::new(stats),
        Err(err) => {
            warn!("could not seed stats from the last snapshot: {err}");
            Arc::new(Stats::new())
        }
    };

    let rotator = Arc::new(IdentityRotator::default());
    let timeout = settings.fetch.timeout();
    let jitter_ms = settings.fetch.jitter_ms;

    let workers = RegistryWorkers {
        static_scraper: Arc::new(HttpFetchWorker::new(rotator.clone(), timeout, jitter_ms)),
        dynamic_scraper: Arc::new(BrowserFetchWorker::new(
            rotator.clone(),
            settings.queues.dynamic_scraper,
            timeout,
            jitter_ms,
        )) as Arc<dyn Worker>,
        proxy_scraper: Arc::new(ProxyHarvestWorker::new(
            rotator.clone(),
            settings.proxy.clone(),
            timeout,
            jitter_ms,
        )),
        page: Arc::new(PersistWorker::new(users.clone())),
    };
    let queues = Arc::new(QueueRegistry::new(
        &settings.queues,
        &settings.limits,
        workers,
        stats.clone(),
    ));

    let scheduler = Scheduler::new(
        settings, users, templates, stats_store, stats, rotator, queues,
    );
    scheduler.run().await
}
