//! PREDICTOOR: epoch-driven two-sided price-direction prediction agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! validates everything before the first epoch, and dispatches to the
//! simulation, sweep, or live driver.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use predictoor::backtest::{run_simulation, sweep::SweepHarness};
use predictoor::clock::SystemClock;
use predictoor::config::{self, AppConfig, RunMode};
use predictoor::engine::Engine;
use predictoor::feeds::bybit::BybitFeed;
use predictoor::feeds::replay::ReplayFeed;
use predictoor::gateway::{HttpGateway, SimulatedGateway, SubmissionGateway};
use predictoor::model::build_trainer;
use predictoor::storage;

const BANNER: &str = r#"
 ____  ____  _____ ____ ___ ____ _____ ___   ___  ____
|  _ \|  _ \| ____|  _ \_ _/ ___|_   _/ _ \ / _ \|  _ \
| |_) | |_) |  _| | | | | | |     | || | | | | | | |_) |
|  __/|  _ <| |___| |_| | | |___  | || |_| | |_| |  _ <
|_|   |_| \_\_____|____/___\____| |_| \___/ \___/|_| \_\

  Two-sided epoch prediction agent
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let path = std::env::var("PREDICTOOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        mode = ?cfg.agent.mode,
        timeframe = %cfg.epoch.timeframe,
        budget = %cfg.stake.budget,
        approach = ?cfg.trainer.approach,
        "PREDICTOOR starting up"
    );

    // Fatal configuration errors abort before any epoch begins.
    cfg.validate().context("Invalid configuration")?;

    match cfg.agent.mode {
        RunMode::Sim => run_sim(&cfg).await,
        RunMode::Sweep => run_sweep(&cfg).await,
        RunMode::Live => run_live(&cfg).await,
    }
}

fn load_history(cfg: &AppConfig) -> Result<(Arc<ReplayFeed>, config::SimConfig)> {
    let sim = cfg.sim.clone().context("Missing [sim] section")?;
    let feed = ReplayFeed::load_csv(&sim.asset_pair, &sim.history_csv)?;
    Ok((Arc::new(feed), sim))
}

async fn run_sim(cfg: &AppConfig) -> Result<()> {
    let (feed, sim) = load_history(cfg)?;
    let report = run_simulation(&cfg.engine(), feed).await?;

    std::fs::create_dir_all(&sim.output_dir)
        .with_context(|| format!("Failed to create {}", sim.output_dir.display()))?;
    storage::write_epoch_log(&report.records, &sim.output_dir.join("epochs.csv"))?;
    let summary_path = sim.output_dir.join("summary.json");
    storage::save_summary(&report.summary, summary_path.to_str())?;

    log_summary(&report.summary);
    Ok(())
}

async fn run_sweep(cfg: &AppConfig) -> Result<()> {
    let (feed, _) = load_history(cfg)?;
    let sweep = cfg.sweep.clone().context("Missing [sweep] section")?;
    let harness = SweepHarness::new(cfg.engine(), &sweep);

    let records = harness.run(feed).await?;
    if let Some(parent) = sweep.output_csv.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    storage::write_sweep_csv(&records, &sweep.output_csv)?;

    info!(
        combinations = records.len(),
        path = %sweep.output_csv.display(),
        "Sweep complete"
    );
    Ok(())
}

async fn run_live(cfg: &AppConfig) -> Result<()> {
    let live = cfg.live.clone().context("Missing [live] section")?;

    let clock = Arc::new(SystemClock);
    let feed = Arc::new(BybitFeed::new(&live.feed_base_url, live.feed_interval_minutes)?);
    let gateway: Arc<dyn SubmissionGateway> = if live.dry_run {
        warn!("Dry-run mode: stakes are logged, not submitted");
        Arc::new(SimulatedGateway::dry_run())
    } else {
        let api_key = live
            .api_key_env
            .as_deref()
            .map(AppConfig::resolve_env)
            .transpose()?
            .map(SecretString::new);
        Arc::new(HttpGateway::new(
            &live.gateway_url,
            api_key,
            std::time::Duration::from_secs(cfg.epoch.gateway_timeout_secs),
        )?)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    // One engine per pair: own scheduler, scorer, and metrics.
    for pair in &live.pairs {
        let mut engine = Engine::new(
            pair,
            cfg.engine(),
            clock.clone(),
            feed.clone(),
            build_trainer(&cfg.trainer),
            gateway.clone(),
        )?;
        let rx = shutdown_rx.clone();
        let pair = pair.clone();
        handles.push(tokio::spawn(async move {
            match engine.run_until_shutdown(rx).await {
                Ok(summary) => log_summary(&summary),
                Err(e) => error!(pair = %pair, error = %e, "Engine stopped with error"),
            }
        }));
    }

    info!(pairs = live.pairs.len(), "Live engines running (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Engine task panicked");
        }
    }

    info!("PREDICTOOR shut down cleanly");
    Ok(())
}

fn log_summary(summary: &predictoor::engine::RunSummary) {
    let m = &summary.metrics;
    info!(
        pair = %summary.asset_pair,
        epochs = summary.epochs,
        accepted = summary.accepted,
        missed = summary.missed,
        accuracy = format!("{:.2}%", m.accuracy_estimate * 100.0),
        bounds = format!("[{:.2}%, {:.2}%]", m.accuracy_lower * 100.0, m.accuracy_upper * 100.0),
        f1 = format!("{:.3}", m.f1),
        profit = %m.profit,
        "Run summary"
    );
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("predictoor=info"));

    let json_logging = std::env::var("PREDICTOOR_LOG_JSON").is_ok();

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
