//! Mailcast - Mailing dispatch entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use mailcast_common::config::{Config, LoggingConfig};
use mailcast_common::types::Scope;
use mailcast_core::{
    Clock, DispatchEngine, DispatchTrigger, MailingLifecycle, MemoryStatsCache, SmtpMailTransport,
    StatsAggregator, SystemClock,
};
use mailcast_storage::repository::{
    DbAttemptLogRepository, DbClientRepository, DbMailingRepository, DbMessageRepository,
};
use mailcast_storage::DatabasePool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mailcast", version, about = "Mailing dispatch and status lifecycle engine")]
struct Cli {
    /// Configuration file (defaults to ./mailcast.toml, then /etc/mailcast/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run due mailings on the poll interval until interrupted
    Serve,
    /// Run every due mailing once
    SendMailings,
    /// Dispatch one mailing now
    Run { mailing_id: Uuid },
    /// Close the window of a mailing now
    Finish { mailing_id: Uuid },
    /// Show one mailing with its attempt history
    Show { mailing_id: Uuid },
    /// Print mailing and attempt statistics
    Stats {
        /// Restrict to one owner's mailings
        #[arg(long)]
        owner: Option<Uuid>,
    },
}

struct App {
    pool: DatabasePool,
    engine: Arc<DispatchEngine>,
    trigger: Arc<DispatchTrigger>,
    lifecycle: MailingLifecycle,
    stats: StatsAggregator,
}

impl App {
    async fn new(config: &Config) -> Result<Self> {
        let pool = DatabasePool::new(&config.database).await?;

        let mailings = Arc::new(DbMailingRepository::new(pool.clone()));
        let messages = Arc::new(DbMessageRepository::new(pool.clone()));
        let clients = Arc::new(DbClientRepository::new(pool.clone()));
        let logs = Arc::new(DbAttemptLogRepository::new(pool.clone()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let transport = Arc::new(SmtpMailTransport::new(&config.smtp)?);

        let engine = Arc::new(DispatchEngine::new(
            mailings.clone(),
            messages,
            logs.clone(),
            transport,
            clock.clone(),
            config.smtp.from_address.clone(),
        ));
        let trigger = Arc::new(
            DispatchTrigger::new(mailings.clone(), engine.clone(), clock.clone())
                .with_poll_interval(config.dispatch.poll_interval_secs),
        );
        let stats = StatsAggregator::with_config(
            mailings,
            clients,
            logs,
            Arc::new(MemoryStatsCache::new(clock.clone())),
            clock,
            &config.dispatch,
        );
        let lifecycle = engine.lifecycle().clone();

        Ok(Self {
            pool,
            engine,
            trigger,
            lifecycle,
            stats,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging);

    let app = App::new(&config).await?;

    match cli.command {
        Command::Serve => serve(app).await?,
        Command::SendMailings => {
            let report = app.trigger.run_due().await?;
            if report.outcomes.is_empty() {
                println!("No mailings available for sending.");
            }
            for outcome in &report.outcomes {
                println!("{}", outcome);
            }
        }
        Command::Run { mailing_id } => {
            let mut mailing = app.lifecycle.load(mailing_id, false).await?;
            let result = app.engine.run_mailing(&mut mailing).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Finish { mailing_id } => {
            let mut mailing = app.lifecycle.load(mailing_id, false).await?;
            app.lifecycle.force_finish(&mut mailing).await?;
            println!(
                "Mailing {} finished (end time {}).",
                mailing.id, mailing.end_time
            );
        }
        Command::Show { mailing_id } => {
            let detail = app.stats.mailing_detail(mailing_id).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Command::Stats { owner } => {
            let scope = owner.map(Scope::Owner).unwrap_or(Scope::All);
            let summary = app.stats.get_summary(scope).await?;
            let attempts = app.stats.get_stats(scope).await?;
            let out = serde_json::json!({
                "scope": scope,
                "summary": summary,
                "attempts": attempts,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

async fn serve(app: App) -> Result<()> {
    info!("Starting Mailcast dispatch trigger...");

    app.pool.migrate().await?;
    info!("Database migrations completed");

    app.pool.health_check().await?;
    info!("Database connection healthy");

    let trigger_handle = {
        let trigger = app.trigger.clone();
        tokio::spawn(async move {
            trigger.run().await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    trigger_handle.abort();

    info!("Mailcast shutdown complete");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
