//! EDGESCOUT: prediction market edge scanner.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger and alert cooldowns from disk, and either runs one
//! scan or the heartbeat loop with graceful shutdown.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use edgescout::alerts::moltbook::{MoltbookClient, MoltbookNotifier};
use edgescout::alerts::telegram::TelegramNotifier;
use edgescout::alerts::AlertDispatcher;
use edgescout::config::AppConfig;
use edgescout::engine::cooldown::AlertCooldown;
use edgescout::engine::cycle::{CycleReport, CycleSettings, ScanCycle};
use edgescout::engine::heartbeat::{self, HeartbeatSchedule, HeartbeatState};
use edgescout::engine::ledger::{Ledger, LedgerError};
use edgescout::engine::settlement;
use edgescout::llm::gemini::GeminiClient;
use edgescout::llm::openrouter::OpenRouterClient;
use edgescout::llm::EdgeEvaluator;
use edgescout::platforms::polymarket::PolymarketClient;
use edgescout::storage::StorageError;

const BANNER: &str = r#"
  ___ ___   ___ ___ ___  ___ ___  _   _ _____
 | __|   \ / __| __/ __|/ __/ _ \| | | |_   _|
 | _|| |) | (_ | _|\__ \ (_| (_) | |_| | | |
 |___|___/ \___|___|___/\___\___/ \___/  |_|

  Prediction market edge scanner (paper trading)
"#;

/// Heartbeat loop wake-up period.
const TICK: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "edgescout", version, about = "Prediction market edge scanner")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan markets continuously (default) or once.
    Run(RunArgs),
    /// Show paper-trading performance.
    Portfolio {
        /// Fetch current prices and show unrealized PnL.
        #[arg(long)]
        mark: bool,
    },
    /// Show configuration readiness, ledger and heartbeat state.
    Status,
    /// Run due maintenance tasks (presence check, settlement) once.
    Heartbeat,
    /// Send a test message to Telegram.
    TestAlert,
    /// Close positions whose markets have resolved.
    Settle,
    /// Close a position manually.
    Close {
        position_id: Uuid,
        /// Exit price of the position's side, in [0, 1].
        #[arg(long)]
        exit_price: Decimal,
    },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Run a single scan and exit.
    #[arg(long)]
    once: bool,

    /// Scan interval in minutes.
    #[arg(long)]
    interval: Option<u64>,

    /// Minimum confidence (1-10) for a position and alert.
    #[arg(long)]
    threshold: Option<u8>,

    /// Also post alerts to Moltbook.
    #[arg(long)]
    moltbook: bool,

    /// Agent asked for a peer review over Moltbook DM.
    #[arg(long)]
    ask_peer: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e:#}", error_kind(&e));
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let cfg = AppConfig::load_or_default(&cli.config)?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => cmd_run(cfg, args).await,
        Command::Portfolio { mark } => cmd_portfolio(&cfg, mark).await,
        Command::Status => cmd_status(&cfg),
        Command::Heartbeat => cmd_heartbeat(&cfg).await,
        Command::TestAlert => cmd_test_alert(&cfg).await,
        Command::Settle => cmd_settle(&cfg).await,
        Command::Close {
            position_id,
            exit_price,
        } => cmd_close(&cfg, position_id, exit_price),
    }
}

/// Stable label for the error printed by interactive commands.
fn error_kind(e: &anyhow::Error) -> &'static str {
    if let Some(le) = e.downcast_ref::<LedgerError>() {
        le.kind()
    } else if e.downcast_ref::<StorageError>().is_some() {
        "PersistenceFailure"
    } else {
        "error"
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(mut cfg: AppConfig, args: RunArgs) -> Result<()> {
    if let Some(minutes) = args.interval {
        cfg.agent.scan_interval_minutes = minutes.max(1);
    }
    if let Some(threshold) = args.threshold {
        if !(1..=10).contains(&threshold) {
            bail!("threshold must be between 1 and 10, got {threshold}");
        }
        cfg.scan.min_confidence = threshold;
    }
    let moltbook = args.moltbook || cfg.alerts.moltbook_enabled || args.ask_peer.is_some();
    let peer = args.ask_peer.or_else(|| cfg.alerts.peer_agent.clone());

    let missing = cfg.validate();
    if !missing.is_empty() {
        bail!("Missing configuration: {}", missing.join(", "));
    }
    ensure_data_dir(&cfg)?;

    if !args.once {
        println!("{BANNER}");
    }
    info!(
        agent_name = %cfg.agent.name,
        interval_minutes = cfg.agent.scan_interval_minutes,
        threshold = cfg.scan.min_confidence,
        moltbook,
        peer = ?peer,
        "EDGESCOUT starting up"
    );

    let provider = PolymarketClient::new()?;
    let evaluator = build_evaluator(&cfg)?;
    let dispatcher = build_dispatcher(&cfg, moltbook, peer)?;
    let presence = if moltbook { moltbook_client(&cfg) } else { None };

    let mut ledger = Ledger::open(cfg.ledger_path(), cfg.lock_timeout())?;
    let cooldown_path = cfg.cooldown_path();
    let mut cooldown = load_cooldown(&cooldown_path);
    let cycle = ScanCycle::new(
        &provider,
        evaluator.as_ref(),
        &dispatcher,
        CycleSettings::from_config(&cfg),
    );

    let heartbeat_path = cfg.heartbeat_path();
    let mut beats = load_heartbeat(&heartbeat_path);

    if args.once {
        let report = cycle.run(&mut ledger, &mut cooldown, Utc::now()).await;
        save_cooldown(&cooldown, &cooldown_path);
        beats = beats.completed(heartbeat::MARKET_SCAN, report.finished_at);
        save_heartbeat(&beats, &heartbeat_path);
        print_cycle_report(&report);
        return Ok(());
    }

    let schedule = HeartbeatSchedule::from_config(&cfg, moltbook);
    let mut interval = tokio::time::interval(TICK);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        tick_secs = TICK.as_secs(),
        "Entering main loop. Press Ctrl+C to stop."
    );

    'main: loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }

        let now = Utc::now();
        for task in beats.due_tasks(now, &schedule) {
            // Ledger writes are synchronous under the lock, so dropping the
            // work between awaits never leaves a partial write.
            let work = async {
                match task {
                    heartbeat::MARKET_SCAN => {
                        let report = cycle.run(&mut ledger, &mut cooldown, now).await;
                        save_cooldown(&cooldown, &cooldown_path);
                        print_cycle_report(&report);
                    }
                    heartbeat::MOLTBOOK_CHECK => {
                        if let Some(client) = &presence {
                            run_presence_check(client).await;
                        }
                    }
                    heartbeat::SETTLEMENT => {
                        settlement::settle_resolved(
                            &provider,
                            &mut ledger,
                            cfg.fetch_timeout(),
                            now,
                        )
                        .await;
                    }
                    other => warn!(task = other, "Unknown heartbeat task"),
                }
            };
            if heartbeat::unless_shutdown(work, shutdown.as_mut()).await.is_none() {
                info!(task, "Shutdown signal received, abandoning in-flight task.");
                break 'main;
            }
            beats = beats.completed(task, Utc::now());
            save_heartbeat(&beats, &heartbeat_path);
        }
    }

    save_cooldown(&cooldown, &cooldown_path);
    let summary = ledger.compute_summary();
    info!(
        open = summary.open_count,
        closed = summary.closed_count,
        pnl = %summary.total_realized_pnl,
        "EDGESCOUT shut down cleanly."
    );
    Ok(())
}

async fn cmd_portfolio(cfg: &AppConfig, mark: bool) -> Result<()> {
    let ledger = Ledger::open(cfg.ledger_path(), cfg.lock_timeout())?;
    let summary = ledger.compute_summary();

    println!("Paper Trading Portfolio");
    println!("{}", "=".repeat(40));
    println!("  Total positions: {}", ledger.positions().len());
    println!("  Open:            {}", summary.open_count);
    println!("  Closed:          {}", summary.closed_count);
    println!("  Win rate:        {:.1}%", summary.win_rate * 100.0);
    println!("  Realized PnL:    {:+} units", summary.total_realized_pnl);
    println!("{}", "=".repeat(40));

    let open = ledger.get_open_positions();
    if open.is_empty() {
        return Ok(());
    }

    let unrealized = if mark {
        let provider = PolymarketClient::new()?;
        let marks = settlement::fetch_marks(&provider, &ledger, cfg.fetch_timeout()).await;
        ledger.mark_to_market(&marks)
    } else {
        Default::default()
    };

    println!("Open positions:");
    for p in &open {
        match unrealized.get(&p.position_id) {
            Some(pnl) => println!("  {} {p} | unrealized {pnl:+}", p.position_id),
            None => println!("  {} {p}", p.position_id),
        }
    }
    if mark {
        let total: Decimal = unrealized.values().copied().sum();
        println!(
            "  Unrealized PnL: {total:+} units ({} of {} marked)",
            unrealized.len(),
            open.len()
        );
    }
    Ok(())
}

fn cmd_status(cfg: &AppConfig) -> Result<()> {
    println!("EDGESCOUT Status");
    println!("{}", "=".repeat(40));
    println!("  Agent:       {}", cfg.agent.name);
    println!("  Interval:    {} min", cfg.agent.scan_interval_minutes);
    println!("  Threshold:   {}/10", cfg.scan.min_confidence);
    println!("  Ledger:      {}", cfg.ledger_path().display());

    let missing = cfg.validate();
    if missing.is_empty() {
        println!("  Config:      ready");
    } else {
        println!("  Config:      missing {}", missing.join(", "));
    }
    println!(
        "  Telegram:    {}",
        if telegram_configured(cfg) { "configured" } else { "not configured" }
    );
    println!(
        "  Moltbook:    {}",
        if AppConfig::secret(&cfg.alerts.moltbook_api_key_env).is_some() {
            "configured"
        } else {
            "not configured"
        }
    );

    let ledger = Ledger::open(cfg.ledger_path(), cfg.lock_timeout())?;
    println!("  Positions:   {}", ledger.compute_summary());
    println!(
        "  Cooldowns:   {} market(s)",
        load_cooldown(&cfg.cooldown_path()).len()
    );

    println!("Heartbeat:");
    let lines = load_heartbeat(&cfg.heartbeat_path()).summary(Utc::now());
    if lines.is_empty() {
        println!("  No heartbeat records yet.");
    }
    for line in lines {
        println!("  {line}");
    }
    Ok(())
}

async fn cmd_heartbeat(cfg: &AppConfig) -> Result<()> {
    ensure_data_dir(cfg)?;
    let path = cfg.heartbeat_path();
    let mut beats = load_heartbeat(&path);
    let presence = moltbook_client(cfg);
    let schedule = HeartbeatSchedule::from_config(cfg, presence.is_some());
    let now = Utc::now();

    let due: Vec<&str> = beats
        .due_tasks(now, &schedule)
        .into_iter()
        .filter(|t| *t != heartbeat::MARKET_SCAN)
        .collect();
    if due.is_empty() {
        println!("Nothing due.");
    }

    for task in due {
        match task {
            heartbeat::MOLTBOOK_CHECK => {
                if let Some(client) = &presence {
                    run_presence_check(client).await;
                }
            }
            heartbeat::SETTLEMENT => {
                let provider = PolymarketClient::new()?;
                let mut ledger = Ledger::open(cfg.ledger_path(), cfg.lock_timeout())?;
                let report =
                    settlement::settle_resolved(&provider, &mut ledger, cfg.fetch_timeout(), now)
                        .await;
                println!(
                    "Settlement: {} checked, {} settled, {} errors",
                    report.checked,
                    report.settled.len(),
                    report.errors.len()
                );
            }
            _ => {}
        }
        beats = beats.completed(task, Utc::now());
    }
    beats.save(&path)?;

    for line in beats.summary(Utc::now()) {
        println!("  {line}");
    }
    Ok(())
}

async fn cmd_test_alert(cfg: &AppConfig) -> Result<()> {
    let Some(token) = AppConfig::secret(&cfg.alerts.telegram_bot_token_env) else {
        bail!(
            "Telegram not configured. Set {} and {}",
            cfg.alerts.telegram_bot_token_env,
            cfg.alerts.telegram_chat_id_env
        );
    };
    let chat_id = AppConfig::resolve_env(&cfg.alerts.telegram_chat_id_env).unwrap_or_default();
    let telegram = TelegramNotifier::new(token, chat_id)?;
    telegram
        .send_test(&cfg.agent.name)
        .await
        .context("Failed to send test alert")?;
    println!("Test alert sent.");
    Ok(())
}

async fn cmd_settle(cfg: &AppConfig) -> Result<()> {
    let provider = PolymarketClient::new()?;
    let mut ledger = Ledger::open(cfg.ledger_path(), cfg.lock_timeout())?;
    let report =
        settlement::settle_resolved(&provider, &mut ledger, cfg.fetch_timeout(), Utc::now()).await;

    println!(
        "Checked {} open position(s): {} settled, {} still trading, {} error(s)",
        report.checked,
        report.settled.len(),
        report.still_open,
        report.errors.len()
    );
    for p in &report.settled {
        println!("  {p}");
    }
    for (market_id, e) in &report.errors {
        println!("  {market_id}: {e}");
    }
    if !report.settled.is_empty() {
        println!("Realized this run: {:+} units", report.realized_pnl());
    }
    Ok(())
}

fn cmd_close(cfg: &AppConfig, position_id: Uuid, exit_price: Decimal) -> Result<()> {
    let mut ledger = Ledger::open(cfg.ledger_path(), cfg.lock_timeout())?;
    let closed = ledger.close_position(position_id, exit_price, Utc::now())?;
    println!("Closed {closed}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_evaluator(cfg: &AppConfig) -> Result<Box<dyn EdgeEvaluator>> {
    let openrouter_key = AppConfig::secret(&cfg.llm.api_key_env);
    let gemini_key = AppConfig::secret(&cfg.llm.gemini_api_key_env);

    let use_gemini = cfg.llm.provider == "gemini" || openrouter_key.is_none();
    match (use_gemini, openrouter_key, gemini_key) {
        (false, Some(key), _) => {
            info!(
                model = ?cfg.llm.model,
                fallback = ?cfg.llm.fallback_model,
                "Using OpenRouter LLM provider"
            );
            let client = OpenRouterClient::new(
                key,
                cfg.llm.model.clone(),
                cfg.llm.fallback_model.clone(),
                Some(cfg.llm.max_tokens),
                Some(cfg.llm.temperature),
            )?
            .with_app_title(&cfg.agent.name);
            Ok(Box::new(client))
        }
        (_, _, Some(key)) => {
            info!(model = ?cfg.llm.gemini_model, "Using Gemini LLM provider");
            Ok(Box::new(GeminiClient::new(
                key,
                cfg.llm.gemini_model.clone(),
                Some(cfg.llm.max_tokens),
                Some(cfg.llm.temperature),
            )?))
        }
        (true, Some(key), None) => {
            warn!("Gemini key not set, using OpenRouter");
            Ok(Box::new(OpenRouterClient::new(
                key,
                cfg.llm.model.clone(),
                cfg.llm.fallback_model.clone(),
                Some(cfg.llm.max_tokens),
                Some(cfg.llm.temperature),
            )?))
        }
        (_, None, None) => bail!(
            "No LLM API key set ({} or {})",
            cfg.llm.api_key_env,
            cfg.llm.gemini_api_key_env
        ),
    }
}

fn telegram_configured(cfg: &AppConfig) -> bool {
    AppConfig::secret(&cfg.alerts.telegram_bot_token_env).is_some()
        && AppConfig::resolve_env(&cfg.alerts.telegram_chat_id_env)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
}

fn moltbook_client(cfg: &AppConfig) -> Option<MoltbookClient> {
    let key = AppConfig::secret(&cfg.alerts.moltbook_api_key_env)?;
    match MoltbookClient::new(key) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %e, "Moltbook client unavailable");
            None
        }
    }
}

fn build_dispatcher(
    cfg: &AppConfig,
    moltbook: bool,
    peer: Option<String>,
) -> Result<AlertDispatcher> {
    let mut dispatcher = AlertDispatcher::new(Duration::from_secs(cfg.alerts.notify_timeout_secs));

    match AppConfig::secret(&cfg.alerts.telegram_bot_token_env) {
        Some(token) => {
            let chat_id =
                AppConfig::resolve_env(&cfg.alerts.telegram_chat_id_env).unwrap_or_default();
            match TelegramNotifier::new(token, chat_id) {
                Ok(t) => dispatcher.push(Box::new(t)),
                Err(e) => warn!(error = %e, "Telegram alerts disabled"),
            }
        }
        None => warn!(
            env = %cfg.alerts.telegram_bot_token_env,
            "Telegram bot token not set, alerts will not be sent to Telegram"
        ),
    }

    if moltbook {
        match moltbook_client(cfg) {
            Some(client) => {
                let notifier =
                    MoltbookNotifier::new(client, &cfg.alerts.moltbook_submolt, &cfg.agent.name)
                        .with_peer_review(peer);
                dispatcher.push(Box::new(notifier));
            }
            None => warn!(
                env = %cfg.alerts.moltbook_api_key_env,
                "Moltbook requested but API key not set"
            ),
        }
    }

    info!(sinks = ?dispatcher.names(), "Alert sinks configured");
    Ok(dispatcher)
}

async fn run_presence_check(client: &MoltbookClient) {
    let report = client.check_presence().await;
    info!(
        status = report.status_label(),
        dm_activity = report.has_dm_activity(),
        feed_posts = report.feed_len(),
        "Moltbook presence check"
    );
}

fn ensure_data_dir(cfg: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(&cfg.agent.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            cfg.agent.data_dir.display()
        )
    })
}

fn load_cooldown(path: &Path) -> AlertCooldown {
    match AlertCooldown::load(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Alert cooldowns unreadable, starting empty");
            AlertCooldown::new()
        }
    }
}

fn save_cooldown(cooldown: &AlertCooldown, path: &Path) {
    if let Err(e) = cooldown.save(path) {
        error!(error = %e, "Failed to save alert cooldowns");
    }
}

fn load_heartbeat(path: &Path) -> HeartbeatState {
    match HeartbeatState::load(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Heartbeat state unreadable, starting fresh");
            HeartbeatState::default()
        }
    }
}

fn save_heartbeat(state: &HeartbeatState, path: &Path) {
    if let Err(e) = state.save(path) {
        error!(error = %e, "Failed to save heartbeat state");
    }
}

/// Human-readable cycle summary.
fn print_cycle_report(report: &CycleReport) {
    println!("{}", "=".repeat(50));
    println!(
        "Scan {} ({}s)",
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        (report.finished_at - report.started_at).num_seconds()
    );
    if let Some(e) = &report.provider_error {
        println!("  Provider unavailable: {e}");
    }
    println!(
        "  Scanned {} | skipped {} | evaluator failures {} | below threshold {}",
        report.markets_scanned,
        report.markets_skipped.len(),
        report.evaluator_failures.len(),
        report.below_threshold
    );
    for p in &report.positions_opened {
        println!("  Opened {p}");
    }
    for (market_id, e) in &report.persistence_failures {
        println!("  Not recorded {market_id}: {e}");
    }
    println!(
        "  {} alert(s), {} delivered",
        report.alerts_emitted(),
        report.alerts_delivered
    );
    for (market_id, sink, e) in &report.notification_failures {
        println!("  {sink} failed for {market_id}: {e}");
    }
    println!("{}", "=".repeat(50));
}

/// Initialise the `tracing` subscriber.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "edgescout=debug" } else { "edgescout=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let json_logging = std::env::var("EDGESCOUT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
