//! kbwatch - knowledge-base ingestion watchdog
//!
//! The `kbwatch` command logs into the console, scans the document table for
//! failed ingestion, retries what it can, and reports to Lark.
//!
//! ## Commands
//!
//! - `run`: one monitoring run
//! - `watch`: repeated runs on an interval until interrupted
//! - `show-config`: print the effective configuration

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kbwatch_browser::{launch, LaunchOptions};
use kbwatch_core::telemetry::{init_tracing, TelemetryConfig};
use kbwatch_core::{
    assemble_result, deliver, AppConfig, BrowserFault, BrowserSession, Credentials, LogSink,
    NotificationSink, RunContext, RunError, RunOrchestrator, RunProgress, Secret,
};
use kbwatch_lark::{LarkConfig, LarkNotifier};
use tracing::{error, info, warn};

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "kbwatch")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Knowledge-base ingestion watchdog", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "KBWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    #[command(flatten)]
    secrets: SecretArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Credentials and tokens. Normally supplied through the environment.
#[derive(Args, Default)]
struct SecretArgs {
    /// Console login user
    #[arg(long, global = true, env = "KB_USERNAME", hide_env_values = true)]
    username: Option<String>,

    /// Console login password
    #[arg(long, global = true, env = "KB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Lark custom-bot webhook URL
    #[arg(long, global = true, env = "LARK_WEBHOOK_URL", hide_env_values = true)]
    lark_webhook_url: Option<String>,

    /// Lark app id, for screenshot upload
    #[arg(long, global = true, env = "LARK_APP_ID", hide_env_values = true)]
    lark_app_id: Option<String>,

    /// Lark app secret, for screenshot upload
    #[arg(long, global = true, env = "LARK_APP_SECRET", hide_env_values = true)]
    lark_app_secret: Option<String>,
}

impl SecretArgs {
    fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(self.username.clone(), self.password.clone())
    }

    fn webhook(&self) -> Option<Secret> {
        self.lark_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(Secret::new)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan / retry / report cycle
    Run,

    /// Run repeatedly until Ctrl-C
    Watch {
        /// Seconds between the end of one run and the start of the next
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },

    /// Print the effective configuration (secrets omitted)
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.headed {
        config.browser.headless = false;
    }

    let telemetry = TelemetryConfig::from_section(&config.logging)
        .context("Invalid logging configuration")?
        .with_overrides(cli.verbose, cli.json);
    init_tracing(&telemetry).context("Failed to initialise logging")?;

    let code = match cli.command {
        Commands::ShowConfig => cmd_show_config(&config, &cli.secrets)?,
        Commands::Run => cmd_run(&config, &cli.secrets).await?,
        Commands::Watch { interval_secs } => {
            cmd_watch(&config, &cli.secrets, Duration::from_secs(interval_secs)).await?
        }
    };
    Ok(ExitCode::from(code))
}

fn cmd_show_config(config: &AppConfig, secrets: &SecretArgs) -> Result<u8> {
    let rendered = config.to_toml().context("Failed to render configuration")?;
    println!("{rendered}");

    let state = |set: bool| if set { "set" } else { "not set" };
    println!("# KB_USERNAME: {}", state(secrets.username.is_some()));
    println!("# KB_PASSWORD: {}", state(secrets.password.is_some()));
    println!("# LARK_WEBHOOK_URL: {}", state(secrets.webhook().is_some()));
    println!("# LARK_APP_ID: {}", state(secrets.lark_app_id.is_some()));
    println!("# LARK_APP_SECRET: {}", state(secrets.lark_app_secret.is_some()));
    Ok(EXIT_OK)
}

/// Lark when enabled and a webhook is configured, otherwise the log.
fn build_sink(config: &AppConfig, secrets: &SecretArgs) -> Result<Box<dyn NotificationSink>> {
    if !config.lark.enabled {
        info!("Lark disabled, reports go to the log");
        return Ok(Box::new(LogSink));
    }
    let Some(webhook) = secrets.webhook() else {
        warn!("LARK_WEBHOOK_URL not set, reports go to the log");
        return Ok(Box::new(LogSink));
    };
    let lark = LarkConfig::from_section(
        &config.lark,
        webhook,
        secrets.lark_app_id.clone(),
        secrets.lark_app_secret.clone().map(Secret::new),
    );
    let notifier = LarkNotifier::new(lark).context("Failed to build Lark client")?;
    Ok(Box::new(notifier))
}

enum CycleEnd {
    Finished(i32),
    Interrupted,
}

/// Drive one run on `session`, racing it against `shutdown`. The session is
/// closed either way.
async fn drive<F>(
    ctx: RunContext,
    sink: &dyn NotificationSink,
    session: &mut dyn BrowserSession,
    shutdown: F,
) -> CycleEnd
where
    F: Future<Output = ()>,
{
    let run_id = ctx.run_id.clone();
    let run = RunOrchestrator::new(ctx, sink).run(&mut *session);
    let end = tokio::select! {
        outcome = run => {
            if let Some(err) = &outcome.notify_error {
                warn!(run_id = %run_id, error = %err, "report was not delivered");
            }
            CycleEnd::Finished(outcome.exit_code())
        }
        _ = shutdown => {
            warn!(run_id = %run_id, "interrupted, abandoning run");
            CycleEnd::Interrupted
        }
    };
    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close browser");
    }
    end
}

/// Report a run that could not start because the browser did not launch.
async fn report_launch_failure(
    ctx: &RunContext,
    sink: &dyn NotificationSink,
    err: &kbwatch_browser::LaunchError,
    started: Instant,
) -> i32 {
    let run_error = RunError::Browser(BrowserFault::Protocol(err.to_string()));
    error!(run_id = %ctx.run_id, error = %run_error, "browser launch failed");
    let result = assemble_result(ctx, &RunProgress::default(), Some(&run_error), started.elapsed());
    if let Err(e) = deliver(sink, &result).await {
        warn!(error = %e, "report was not delivered");
    }
    result.exit_code()
}

async fn cycle<F>(
    config: &AppConfig,
    secrets: &SecretArgs,
    sink: &dyn NotificationSink,
    shutdown: F,
) -> Result<CycleEnd>
where
    F: Future<Output = ()>,
{
    let started = Instant::now();
    let ctx = RunContext::from_config(config, secrets.credentials())
        .context("Invalid configuration")?;
    info!(run_id = %ctx.run_id, "starting run");

    let options = LaunchOptions::from_section(&config.browser);
    let mut session = match launch(&options).await {
        Ok(session) => session,
        Err(e) => {
            return Ok(CycleEnd::Finished(
                report_launch_failure(&ctx, sink, &e, started).await,
            ))
        }
    };
    Ok(drive(ctx, sink, &mut session, shutdown).await)
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn exit_code(end: &CycleEnd) -> u8 {
    match end {
        CycleEnd::Finished(0) => EXIT_OK,
        CycleEnd::Finished(_) => EXIT_FAILED,
        CycleEnd::Interrupted => EXIT_INTERRUPTED,
    }
}

async fn cmd_run(config: &AppConfig, secrets: &SecretArgs) -> Result<u8> {
    let sink = build_sink(config, secrets)?;
    let end = cycle(config, secrets, sink.as_ref(), interrupted()).await?;
    Ok(exit_code(&end))
}

async fn cmd_watch(config: &AppConfig, secrets: &SecretArgs, interval: Duration) -> Result<u8> {
    let sink = build_sink(config, secrets)?;
    info!(interval_secs = interval.as_secs(), "watching");

    let mut runs: u64 = 0;
    loop {
        let end = cycle(config, secrets, sink.as_ref(), interrupted()).await?;
        runs += 1;
        match end {
            CycleEnd::Interrupted => return Ok(EXIT_INTERRUPTED),
            CycleEnd::Finished(code) => {
                info!(runs, exit_code = code, "run finished, sleeping until next");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = interrupted() => {
                info!(runs, "interrupted while idle");
                return Ok(EXIT_INTERRUPTED);
            }
        }
    }
}
