//! Homebot: daily homework digests for chat subscribers.
//!
//! Main binary with subcommands:
//! - `daemon`: Schedule and deliver daily notifications until interrupted
//! - `preview`: Print tomorrow's message for one subscriber
//! - `next-run`: Print when a subscriber will next be notified
//! - `init`: Create an empty record store

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, FixedOffset, NaiveTime};
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homebot_scheduler::{NotifyConfig, OwnerId};

mod daemon;
mod notifier;
mod store;

/// Upper bound for minute options: one day.
const MAX_OFFSET_MINUTES: i64 = 24 * 60;

const MAX_RETRY_DELAY_SECS: i64 = 24 * 60 * 60;

/// Parse a UTC offset such as `+05:00`.
fn parse_utc_offset(s: &str) -> Result<FixedOffset, String> {
    s.trim()
        .parse::<FixedOffset>()
        .map_err(|e| format!("invalid UTC offset '{}': {}, expected e.g. +05:00", s, e))
}

/// Parse a wall-clock time such as `15:00`.
fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| format!("invalid time '{}': {}, expected HH:MM", s, e))
}

#[derive(Parser)]
#[command(name = "homebot")]
#[command(about = "Daily homework digests for chat subscribers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Record store location.
#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// JSON file holding subscribers, timetables and homework
    #[arg(long, env = "HOMEBOT_DATA_FILE", default_value = "homebot.json")]
    data_file: PathBuf,
}

/// Delivery timing.
#[derive(Args, Debug, Clone)]
struct NotifyArgs {
    /// UTC offset that defines "today" and "tomorrow"
    #[arg(long, env = "HOMEBOT_UTC_OFFSET", value_parser = parse_utc_offset, default_value = "+05:00")]
    utc_offset: FixedOffset,

    /// Minutes after the last lesson ends to send the digest
    #[arg(
        long,
        env = "HOMEBOT_LESSON_OFFSET_MINUTES",
        default_value = "60",
        value_parser = clap::value_parser!(i64).range(0..=MAX_OFFSET_MINUTES)
    )]
    lesson_offset_minutes: i64,

    /// Send time on days without timed lessons
    #[arg(long, env = "HOMEBOT_FALLBACK_TIME", value_parser = parse_time, default_value = "15:00")]
    fallback_time: NaiveTime,

    /// How far a fire may drift from its expected instant, in minutes
    #[arg(
        long,
        env = "HOMEBOT_WINDOW_TOLERANCE_MINUTES",
        default_value = "10",
        value_parser = clap::value_parser!(i64).range(0..=MAX_OFFSET_MINUTES)
    )]
    window_tolerance_minutes: i64,

    /// Delay before retrying a failed delivery, in seconds
    #[arg(
        long,
        env = "HOMEBOT_RETRY_DELAY_SECS",
        default_value = "60",
        value_parser = clap::value_parser!(i64).range(1..=MAX_RETRY_DELAY_SECS)
    )]
    retry_delay_secs: i64,
}

impl NotifyArgs {
    fn to_config(&self) -> NotifyConfig {
        NotifyConfig {
            zone: self.utc_offset,
            lesson_offset: Duration::minutes(self.lesson_offset_minutes),
            fallback_time: self.fallback_time,
            window_tolerance: Duration::minutes(self.window_tolerance_minutes),
            retry_delay: Duration::seconds(self.retry_delay_secs),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the notification daemon
    Daemon {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        notify: NotifyArgs,

        /// Chat gateway webhook; messages are only logged when unset
        #[arg(long, env = "HOMEBOT_WEBHOOK_URL")]
        webhook_url: Option<String>,

        /// How often to look for newly enabled subscribers, in seconds
        #[arg(
            long,
            env = "HOMEBOT_RESCAN_SECS",
            default_value = "60",
            value_parser = clap::value_parser!(u64).range(1..=86400)
        )]
        rescan_secs: u64,
    },

    /// Print tomorrow's message for a subscriber without sending it
    Preview {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        notify: NotifyArgs,

        /// Subscriber chat id
        #[arg(long)]
        owner: i64,
    },

    /// Create an empty record store
    Init {
        #[command(flatten)]
        store: StoreArgs,

        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
    },

    /// Print the next notification time for a subscriber
    NextRun {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        notify: NotifyArgs,

        /// Subscriber chat id
        #[arg(long)]
        owner: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "homebot=info,homebot_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            store,
            notify,
            webhook_url,
            rescan_secs,
        } => {
            daemon::run(daemon::DaemonConfig {
                data_file: store.data_file,
                webhook_url,
                notify: notify.to_config(),
                rescan_interval: std::time::Duration::from_secs(rescan_secs),
            })
            .await
        }

        Commands::Preview {
            store,
            notify,
            owner,
        } => {
            let driver = daemon::open_driver(
                &store.data_file,
                Arc::new(notifier::LogNotifier),
                notify.to_config(),
            )
            .await?;
            let text = driver
                .preview(OwnerId(owner))
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            println!("{}", text);
            Ok(())
        }

        Commands::Init { store, overwrite } => {
            if store.data_file.exists() && !overwrite {
                return Err(miette::miette!(
                    "{} already exists, use --overwrite to replace it",
                    store.data_file.display()
                ));
            }
            crate::store::JsonStore::create(&store.data_file, crate::store::StoreFile::default())
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            println!("created {}", store.data_file.display());
            Ok(())
        }

        Commands::NextRun {
            store,
            notify,
            owner,
        } => {
            let config = notify.to_config();
            let driver = daemon::open_driver(
                &store.data_file,
                Arc::new(notifier::LogNotifier),
                config,
            )
            .await?;
            let next = driver
                .next_run(OwnerId(owner))
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            println!("{}", next.with_timezone(&config.zone).format("%Y-%m-%d %H:%M %:z"));
            Ok(())
        }
    }
}
