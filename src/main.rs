//! # Outreach operator binary
//!
//! Usage:
//!   outreach scan weather_headsup          # Run one campaign scanner now
//!   outreach daemon                        # Run campaigns on their cron schedules
//!   outreach serve --port 8090             # HTTP trigger surface
//!   outreach event '{"event": "..."}'      # Handle one lifecycle event
//!   outreach escalations                   # List emergencies awaiting a human

mod trigger;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use outreach_channels::{ChannelTransport, LogTransport};
use outreach_core::traits::{RateLimitStore, Transport};
use outreach_core::{Clock, OutreachConfig, SystemClock};
use outreach_engine::{
    Campaign, Collaborators, LifecycleEvent, MemoryRateLimiter, NwsWeatherSource, OutreachDb, OutreachEngine,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "outreach", version, about = "📣 Proactive outreach & dispatch engine")]
struct Cli {
    /// Config file (default: ~/.outreach/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log sends instead of delivering them
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one campaign scanner and print its summary
    Scan {
        /// Campaign name, e.g. maintenance_reminder or win-back
        campaign: String,
    },
    /// Run every enabled campaign on its cron schedule
    Daemon {
        #[arg(long, default_value = "30")]
        check_interval_secs: u64,
    },
    /// Serve the HTTP trigger surface (also runs the campaign loop with --with-daemon)
    Serve {
        #[arg(short, long, default_value = "8090")]
        port: u16,
        #[arg(long)]
        with_daemon: bool,
    },
    /// Handle one lifecycle event given as JSON
    Event { json: String },
    /// List emergency requests waiting for manual dispatch
    Escalations {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

fn load_config(path: Option<&Path>) -> Result<OutreachConfig> {
    Ok(match path {
        Some(path) => OutreachConfig::load_from(path)?,
        None => OutreachConfig::load()?,
    })
}

fn build_engine(config: OutreachConfig, dry_run: bool) -> Result<Arc<OutreachEngine>> {
    let db_path = shellexpand::tilde(&config.store.db_path).to_string();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let db = Arc::new(OutreachDb::open(Path::new(&db_path))?.with_clock(clock.clone()));

    let rate_limits: Arc<dyn RateLimitStore> = if config.gate.shared_rate_limit {
        db.clone()
    } else {
        Arc::new(MemoryRateLimiter::new())
    };
    let transport: Arc<dyn Transport> = if dry_run {
        Arc::new(LogTransport)
    } else {
        Arc::new(ChannelTransport::from_config(&config.channel))
    };
    let weather = Arc::new(NwsWeatherSource::new(&config.weather));

    tracing::info!("🗄️ Store: {db_path}");
    let collaborators = Collaborators::from_db(db, rate_limits, weather, transport, clock);
    Ok(Arc::new(OutreachEngine::new(config, collaborators)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "outreach=debug,outreach_engine=debug,outreach_channels=debug,tower_http=debug"
    } else {
        "outreach=info,outreach_engine=info,outreach_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let engine = build_engine(config, cli.dry_run)?;

    match cli.command {
        Command::Scan { campaign } => {
            let campaign: Campaign = campaign.parse()?;
            let summary = engine.run_campaign(campaign).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Daemon { check_interval_secs } => {
            outreach_engine::spawn_campaign_loop(engine, check_interval_secs).await;
        }
        Command::Serve { port, with_daemon } => {
            if with_daemon {
                tokio::spawn(outreach_engine::spawn_campaign_loop(engine.clone(), 30));
            }
            trigger::serve(engine, port).await?;
        }
        Command::Event { json } => {
            let event: LifecycleEvent = serde_json::from_str(&json)?;
            let outcome = engine.handle(event).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Escalations { limit } => {
            let requests = engine.escalations(limit).await?;
            if requests.is_empty() {
                println!("✅ No emergencies waiting for manual dispatch.");
            }
            for r in requests {
                println!(
                    "🚨 {} | {} | {} | {}",
                    r.created_at.format("%Y-%m-%d %H:%M UTC"),
                    r.requester_id,
                    r.location_hint.as_deref().unwrap_or("-"),
                    r.raw_message
                );
            }
        }
    }

    Ok(())
}
