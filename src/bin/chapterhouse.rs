//! Chapterhouse admin CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create the storage directory and a default config
//! chapterhouse init
//!
//! # Seed a member, a work and a paid episode
//! chapterhouse add-member reader-1 --balance 15
//! chapterhouse add-work "Iron Lotus" author-1
//! chapterhouse add-episode 1 1 "The Gate" --coin-cost 10
//!
//! # Open an episode (or its neighbour) as a member
//! chapterhouse open 1 --member reader-1
//! chapterhouse open 1 --member reader-1 --direction next
//!
//! # Run and read back a ranking
//! chapterhouse rank weekly --date 2024-08-08
//! chapterhouse ranking weekly --date 2024-08-08
//! ```
//!
//! The view buffer lives in this process, so `open` reconciles it before
//! exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chapterhouse::db::{episodes, EpisodeStatus, NewEpisode};
use chapterhouse::services::events::spawn_logging_listener;
use chapterhouse::{Config, CoreDb, Direction, RankingPeriod, Services, Viewer};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chapterhouse")]
#[command(about = "Coin ledger, view reconciliation and rankings for serial fiction")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CHAPTERHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CHAPTERHOUSE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the storage directory and write a default config
    Init,

    /// Register a member
    AddMember {
        member_id: String,
        #[arg(long, default_value_t = 0)]
        balance: i64,
    },

    /// Create a work
    AddWork { title: String, author_id: String },

    /// Create an episode in a work
    AddEpisode {
        work_id: i64,
        chapter: i64,
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long, default_value_t = 0)]
        coin_cost: i64,
        /// active, hidden or deleted
        #[arg(long, default_value = "active")]
        status: EpisodeStatus,
    },

    /// Add coins to a member's balance
    TopUp { member_id: String, amount: i64 },

    /// Open an episode, or its neighbour with --direction
    Open {
        episode_id: i64,
        #[arg(long)]
        member: Option<String>,
        /// next or prev
        #[arg(long)]
        direction: Option<Direction>,
    },

    /// Compute, persist and publish a ranking
    Rank {
        period: RankingPeriod,
        /// Ranking date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show a persisted ranking
    Ranking {
        period: RankingPeriod,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show a member's coin purchases
    History {
        member_id: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Coins earned per work between two dates (inclusive)
    Revenue {
        #[arg(long, value_delimiter = ',', required = true)]
        works: Vec<i64>,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },

    /// Show a member's recent reads
    Reads {
        member_id: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show database statistics
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chapterhouse=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    if let Command::Init = args.command {
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }
        CoreDb::open(&config.database_path())?;
        info!(db = %config.database_path().display(), "Database ready");
        return Ok(());
    }

    let db = Arc::new(CoreDb::open(&config.database_path())?);
    let services = Services::new(db.clone(), &config)?;
    let _listener = spawn_logging_listener(services.events.clone());
    let today = Local::now().date_naive();

    match args.command {
        Command::Init => {}
        Command::AddMember { member_id, balance } => {
            print_json(&services.wallet.register_member(&member_id, balance)?)?;
        }
        Command::AddWork { title, author_id } => {
            print_json(&db.with_conn_mut(|conn| episodes::create_work(conn, &title, &author_id))?)?;
        }
        Command::AddEpisode { work_id, chapter, title, content, coin_cost, status } => {
            let input = NewEpisode { work_id, chapter, title, content, status, coin_cost };
            print_json(&db.with_conn_mut(|conn| episodes::create_episode(conn, &input))?)?;
        }
        Command::TopUp { member_id, amount } => {
            let balance = services.wallet.credit_coins(&member_id, amount)?;
            print_json(&serde_json::json!({ "member_id": member_id, "balance": balance }))?;
        }
        Command::Open { episode_id, member, direction } => {
            let viewer = Viewer::from(member);
            let view = match direction {
                Some(direction) => services.navigator.adjacent_episode(&viewer, episode_id, direction)?,
                None => services.gate.open_episode(&viewer, episode_id)?,
            };
            print_json(&view)?;

            // Drain before exit; the buffer does not outlive the process
            let report = services.reconciler.flush(today)?;
            info!(episodes = report.episodes_updated, views = report.views_applied, "Flushed view buffer");
        }
        Command::Rank { period, date } => {
            let entries = services.rankings.compute_ranking(period, date.unwrap_or(today))?;
            print_json(&entries)?;
        }
        Command::Ranking { period, date } => {
            print_json(&services.rankings.rankings(period, date.unwrap_or(today))?)?;
        }
        Command::History { member_id, limit, offset } => {
            print_json(&services.wallet.coin_history(&member_id, limit, offset)?)?;
        }
        Command::Revenue { works, start, end } => {
            print_json(&services.wallet.revenue(&works, start, end)?)?;
        }
        Command::Reads { member_id, limit } => {
            print_json(&services.wallet.recent_reads(&member_id, limit)?)?;
        }
        Command::Stats => {
            print_json(&db.stats()?)?;
        }
    }

    Ok(())
}
