//! rulesweep - unused access rule cleanup for FMC
//!
//! Connects to a Secure Firewall Management Center, reads the hit counters of
//! one managed device and disables the zero-hit access rules that no zone or
//! prefix exclusion protects. Each disabled rule receives an audit comment.
//!
//! # Usage
//!
//! ```bash
//! export FMC_PASSWORD=...
//!
//! # Preview what would be disabled
//! rulesweep --host fmc.example.com --username api --device fw-01 --dry-run
//!
//! # Protect zones and prefixes, write a JSON report
//! rulesweep --host fmc.example.com --username api --device fw-01 \
//!     --exclude-zones TRUSTED DMZ --exclude-prefixes 10.0.0.0/8 \
//!     --report sweep.json
//! ```

use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rulesweep::config::{self, SweepConfig};
use rulesweep::core::error::ApiErrorPattern;
use rulesweep::core::prefix::MatchMode;
use rulesweep::core::rule::RuleAction;
use rulesweep::core::stats::StopReason;
use rulesweep::fmc::FmcClient;
use rulesweep::{Error, RunStatistics, SweepObserver, Sweeper, audit, report, utils};
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

shadow_rs::shadow!(build);

const EXAMPLES: &str = "\
Examples:
  rulesweep --host 192.168.1.100 --username admin --device fw-01 --dry-run
  rulesweep --host 192.168.1.100 --username admin --device fw-01 --max-disables 500 \\
      --exclude-zones TRUSTED DMZ
  rulesweep --host 192.168.1.100 --username admin --device fw-01 --year-threshold 2022 \\
      --rule-actions ALLOW BLOCK
  rulesweep --host 192.168.1.100 --username admin --device fw-01 \\
      --exclude-prefixes 10.2.0.0/16 --prefix-match-mode subnet --dry-run
  rulesweep --host 192.168.1.100 --username admin --device fw-01 --autodeploy
  rulesweep --config sweep.json --device fw-01 --report sweep-report.json

The password is read from FMC_PASSWORD.";

#[derive(Parser)]
#[command(name = "rulesweep", version = build::PKG_VERSION)]
#[command(long_version = build::CLAP_LONG_VERSION)]
#[command(about = "Disable unused FMC access rules based on hit counts", long_about = None)]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// FMC host name or IP address
    #[arg(long, env = "FMC_HOST")]
    host: Option<String>,

    /// FMC API user
    #[arg(long, env = "FMC_USERNAME")]
    username: Option<String>,

    /// FMC password
    #[arg(long, env = "FMC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Target device name (cluster or HA pair name for clustered devices)
    #[arg(long)]
    device: Option<String>,

    /// Config file (default: config.json in the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Simulate actions without making changes to FMC
    #[arg(long)]
    dry_run: bool,

    /// Deploy the disabled rules to the device when the run finishes
    #[arg(long)]
    autodeploy: bool,

    /// Maximum number of rules to disable per run (default: 1000)
    #[arg(long, value_name = "N")]
    max_disables: Option<usize>,

    /// Security zones whose rules are never disabled
    #[arg(long, num_args = 1.., value_name = "ZONE")]
    exclude_zones: Vec<String>,

    /// IP prefixes whose rules are never disabled (CIDR notation)
    #[arg(long, num_args = 1.., value_name = "PREFIX")]
    exclude_prefixes: Vec<String>,

    /// How rule networks are matched against excluded prefixes: overlap or subnet
    #[arg(long, value_name = "MODE")]
    prefix_match_mode: Option<MatchMode>,

    /// Rule actions considered for disabling: ALLOW, BLOCK (default: ALLOW)
    #[arg(long, num_args = 1.., value_name = "ACTION")]
    rule_actions: Vec<RuleAction>,

    /// Disable rules created before this year (default: last year)
    #[arg(long, value_name = "YEAR")]
    year_threshold: Option<i32>,

    /// API page size for collection queries (default: 500)
    #[arg(long, value_name = "N")]
    page_limit: Option<usize>,

    /// API timeout in seconds (default: 10)
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Accept a self-signed FMC certificate
    #[arg(long)]
    insecure: bool,

    /// Write a JSON report with summary, disabled and ignored rules
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Print the table of disabled rules after the summary
    #[arg(long)]
    show_table: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Applies command-line values over the file config
    fn apply_overrides(&self, config: &mut SweepConfig) {
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(username) = &self.username {
            config.username = Some(username.clone());
        }
        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }
        config.dry_run |= self.dry_run;
        config.insecure |= self.insecure;
        config.autodeploy |= self.autodeploy;
        if let Some(max) = self.max_disables {
            config.max_disables = max;
        }
        if !self.exclude_zones.is_empty() {
            config.exclude_zones.clone_from(&self.exclude_zones);
        }
        if !self.exclude_prefixes.is_empty() {
            config.exclude_prefixes.clone_from(&self.exclude_prefixes);
        }
        if let Some(mode) = self.prefix_match_mode {
            config.prefix_match_mode = mode;
        }
        if !self.rule_actions.is_empty() {
            config.rule_actions.clone_from(&self.rule_actions);
        }
        if let Some(year) = self.year_threshold {
            config.year_threshold = Some(year);
        }
        if let Some(limit) = self.page_limit {
            config.page_limit = limit;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
    }
}

/// Progress bar over the candidate rules
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    /// Starts hidden; the bar is shared with the log writer
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl SweepObserver for ProgressObserver {
    fn started(&mut self, candidates: usize) {
        let style = ProgressStyle::with_template(
            "{elapsed_precise} {bar:36.cyan/blue} {pos:>4}/{len:4} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("■■□");

        self.bar.set_length(candidates as u64);
        self.bar.set_style(style);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar.enable_steady_tick(Duration::from_millis(200));
    }

    fn rule_processed(&mut self, rule_name: &str, stats: &RunStatistics) {
        self.bar.inc(1);
        self.bar.set_message(format!(
            "{} disabled, {} skipped | {}",
            stats.rules_disabled,
            stats.rules_skipped,
            utils::truncate_string(rule_name, 30)
        ));
    }

    fn retrying(&mut self, rule_name: &str, attempt: usize, delay: Duration) {
        self.bar.set_message(format!(
            "Connection error on {}, retry {attempt} in {}s",
            utils::truncate_string(rule_name, 30),
            delay.as_secs()
        ));
    }

    fn finished(&mut self, _stats: &RunStatistics) {
        self.bar.finish_and_clear();
    }
}

/// Stderr log writer that clears the progress bar while a line is written
struct BarWriter(ProgressBar);

impl io::Write for BarWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn init_logging(log_file: Option<&PathBuf>, debug: bool, bar: &ProgressBar) -> io::Result<()> {
    let level = match (debug, log_file.is_some()) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rulesweep={level}")));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        let bar = bar.clone();
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(move || BarWriter(bar.clone()))
            .init();
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let bar = ProgressBar::hidden();

    if let Err(e) = init_logging(cli.log_file.as_ref(), cli.debug, &bar) {
        eprintln!("Error: cannot open log file: {e}");
        return ExitCode::FAILURE;
    }
    let _ = utils::ensure_dirs();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&cli, bar)) {
        Ok(stats) => match stats.stop_reason {
            StopReason::Exhausted | StopReason::DisableCeiling => ExitCode::SUCCESS,
            StopReason::CircuitBreaker | StopReason::Fatal(_) => ExitCode::from(2),
        },
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &Error) {
    eprintln!("Error: {err}");
    if matches!(err, Error::Config { .. }) {
        return;
    }

    let translation = ApiErrorPattern::match_error(&err.to_string());
    eprintln!("{}", translation.user_message);
    for suggestion in &translation.suggestions {
        eprintln!("  - {suggestion}");
    }
}

async fn run(cli: &Cli, bar: ProgressBar) -> Result<RunStatistics, Error> {
    let mut config = config::load_config(cli.config.as_deref()).await?;
    cli.apply_overrides(&mut config);
    config.validate(config::current_year())?;

    let password = cli
        .password
        .as_deref()
        .ok_or_else(|| Error::config("password", "set FMC_PASSWORD or pass --password"))?;
    let device = config.device_name()?.to_string();
    let client = FmcClient::new(config.client_config(password)?)?;

    let evaluator = config.evaluator(chrono::Utc::now());
    let policy = evaluator.policy();
    let run_id = Uuid::new_v4();
    info!(
        "Starting sweep {run_id} on '{device}' (dry run: {}, autodeploy: {}, max disables: {})",
        config.dry_run, config.autodeploy, config.max_disables
    );
    info!(
        "Year threshold: {}, actions: {:?}, prefix mode: {}",
        policy.year_threshold,
        policy.allowed_actions,
        policy.prefixes.mode()
    );

    client.connect().await?;
    let mut observer = ProgressObserver::new(bar);
    let result = Sweeper::new(&client, evaluator, config.sweep_options())
        .sweep_device(&device, &mut observer)
        .await;
    client.disconnect().await;
    let stats = result?;

    audit::log_sweep(run_id, &stats).await;

    println!("\n{}", report::format_summary(&stats));
    if cli.show_table {
        println!("{}", report::format_disabled_table(&stats.disabled));
    }
    info!(
        "Disabled rules:\n{}",
        report::format_disabled_table(&stats.disabled)
    );

    if let Some(path) = &cli.report {
        let document = report::Report::new(run_id, build::PKG_VERSION, &stats);
        match report::write_report(path, &document) {
            Ok(()) => println!("Report written to {}", path.display()),
            Err(e) => {
                warn!("Failed to write report {}: {e}", path.display());
                eprintln!("Warning: failed to write report {}: {e}", path.display());
            }
        }
    }

    Ok(stats)
}
