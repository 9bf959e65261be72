//! Cadence: scheduled publishing daemon
//!
//! Polls the record store and publishes due posts until Ctrl-C. Every
//! setting has a default or an environment variable, so it runs bare.

use std::path::PathBuf;
use std::time::Duration;

use cadence_scheduler::{ReadyFlagPolicy, SchedulerConfig};
use chrono::NaiveTime;
use chrono_tz::Tz;
use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

/// Parse an IANA zone name such as `Europe/London`.
fn parse_zone(s: &str) -> Result<Tz, String> {
    s.parse::<Tz>()
        .map_err(|e| format!("unknown time zone '{}': {}", s, e))
}

/// Parse a wall-clock time written as `HH:MM`.
fn parse_clock(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| format!("invalid time '{}', expected HH:MM: {}", s, e))
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Scheduled publishing daemon", long_about = None)]
struct Cli {
    /// Record store API base URL
    #[arg(long, env = "CADENCE_STORE_URL", default_value = "https://api.airtable.com")]
    store_url: String,

    /// Record store API key
    #[arg(long, env = "CADENCE_STORE_API_KEY", hide_env_values = true)]
    store_api_key: String,

    /// Record store base id
    #[arg(long, env = "CADENCE_STORE_BASE")]
    store_base: String,

    /// Table holding the scheduled posts
    #[arg(long, env = "CADENCE_STORE_TABLE", default_value = "Posts")]
    store_table: String,

    /// Account file (TOML)
    #[arg(long, env = "CADENCE_ACCOUNTS", default_value = "accounts.toml")]
    accounts: PathBuf,

    /// Browser profile launcher URL
    #[arg(
        long,
        env = "CADENCE_LAUNCHER_URL",
        default_value = "http://local.adspower.net:50325"
    )]
    launcher_url: String,

    /// Automation agent URL
    #[arg(long, env = "CADENCE_AGENT_URL", default_value = "http://127.0.0.1:4723")]
    agent_url: String,

    /// Program run on downloaded media as `<program> [args..] <input> <output>`
    #[arg(long, env = "CADENCE_MEDIA_COMMAND")]
    media_command: Option<PathBuf>,

    /// Extra argument for the media program (repeatable)
    #[arg(long = "media-arg", allow_hyphen_values = true)]
    media_args: Vec<String>,

    /// Time zone the Date and Time columns are written in
    #[arg(long, env = "CADENCE_TIMEZONE", default_value = "Europe/London", value_parser = parse_zone)]
    timezone: Tz,

    /// Time zone used to file screenshots
    #[arg(long, env = "CADENCE_REPORT_TIMEZONE", default_value = "Europe/Kyiv", value_parser = parse_zone)]
    report_timezone: Tz,

    /// Working directory for downloaded media
    #[arg(long, env = "CADENCE_WORK_DIR", default_value = "temp")]
    work_dir: PathBuf,

    /// Root directory for session screenshots
    #[arg(long, env = "CADENCE_ERRORS_DIR", default_value = "errors")]
    errors_dir: PathBuf,

    /// Record refresh interval in seconds
    #[arg(long, default_value = "20")]
    refresh_interval: u64,

    /// Due scan interval in seconds
    #[arg(long, default_value = "10")]
    scan_interval: u64,

    /// Admission tolerance around the target time in seconds
    #[arg(long, default_value = "40")]
    window: u64,

    /// Minimum pause between dispatches in seconds
    #[arg(long, default_value = "10")]
    spacing_min: u64,

    /// Maximum pause between dispatches in seconds
    #[arg(long, default_value = "20")]
    spacing_max: u64,

    /// Local time of the daily media purge (HH:MM)
    #[arg(long, env = "CADENCE_CLEANUP_AT", default_value = "00:00", value_parser = parse_clock)]
    cleanup_at: NaiveTime,

    /// Concurrent session limit (defaults to the number of accounts)
    #[arg(long, env = "CADENCE_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Screenshot successful sessions too.
    /// Accepts "1", "true", "yes", "on" or "0", "false", "no", "off".
    #[arg(long, env = "CADENCE_CAPTURE_ON_SUCCESS", action = clap::ArgAction::Set, value_parser = parse_bool_env, default_value = "true")]
    capture_on_success: bool,

    /// What to do with the ready flag after admission: "clear" or "retain"
    #[arg(long, env = "CADENCE_READY_POLICY", default_value = "clear")]
    ready_policy: ReadyFlagPolicy,
}

impl Cli {
    fn into_config(self) -> daemon::DaemonConfig {
        let scheduler = SchedulerConfig {
            record_zone: self.timezone,
            report_zone: self.report_timezone,
            refresh_interval: Duration::from_secs(self.refresh_interval),
            scan_interval: Duration::from_secs(self.scan_interval),
            matching_window: Duration::from_secs(self.window),
            ready_policy: self.ready_policy,
            spacing_min: Duration::from_secs(self.spacing_min),
            spacing_max: Duration::from_secs(self.spacing_max.max(self.spacing_min)),
            max_sessions: self.max_sessions,
            capture_on_success: self.capture_on_success,
            work_dir: self.work_dir,
            errors_dir: self.errors_dir,
            cleanup_at: self.cleanup_at,
            ..Default::default()
        };

        daemon::DaemonConfig {
            store_url: self.store_url,
            store_api_key: self.store_api_key,
            store_base: self.store_base,
            store_table: self.store_table,
            accounts_path: self.accounts,
            launcher_url: self.launcher_url,
            agent_url: self.agent_url,
            media_command: self.media_command,
            media_args: self.media_args,
            scheduler,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    daemon::run(cli.into_config()).await
}
