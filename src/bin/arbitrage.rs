use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cross_arb::config::{CliArgs, EngineConfig};
use cross_arb::engine::book::{new_cache_channel, run_bbo_feed};
use cross_arb::engine::controller::TradeController;
use cross_arb::engine::datalog::DataLog;
use cross_arb::engine::shutdown::ShutdownCoordinator;
use cross_arb::logging;
use cross_arb::venue::sim::SimVenueClient;
use cross_arb::venue::VenueClient;

const SUPPORTED_EXCHANGES: &[&str] = &["edgex", "standx"];

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let exchange = args.exchange.to_lowercase();
    if !SUPPORTED_EXCHANGES.contains(&exchange.as_str()) {
        eprintln!("Error: unsupported exchange '{exchange}' (supported: {SUPPORTED_EXCHANGES:?})");
        std::process::exit(1);
    }

    let config = EngineConfig::load(args);
    let _guard = logging::init("logs", &format!("{}_{}", config.exchange, config.ticker));

    info!(exchange = %config.exchange, ticker = %config.ticker, "starting cross-exchange arbitrage engine");

    // The real venue wire-format clients (HTTP/WS framing, signing,
    // credential storage) are out of core scope (spec §1); `SimVenueClient`
    // stands in for the concrete `VenueClient` a production build would
    // inject here based on `--exchange`. Initial BBOs are synthetic seeds
    // until the first WS frame arrives.
    let maker = SimVenueClient::new(config.exchange.clone(), dec!(0.1), dec!(60000.0), dec!(60001.0));
    let taker = SimVenueClient::new("lighter".to_string(), dec!(0.1), dec!(60015.0), dec!(60016.0));

    let maker_contract = maker.contract_info(&config.ticker).await.context("fetching maker contract info")?;
    let taker_contract = taker.contract_info(&config.ticker).await.context("fetching taker contract info")?;

    let (updates_m_tx, updates_m_rx) = tokio::sync::mpsc::channel(256);
    let (updates_t_tx, updates_t_rx) = tokio::sync::mpsc::channel(256);
    maker.connect(updates_m_tx).await.context("connecting to maker venue")?;
    taker.connect(updates_t_tx).await.context("connecting to taker venue")?;

    let (cache_m_tx, cache_m_rx) = new_cache_channel();
    let (cache_t_tx, cache_t_rx) = new_cache_channel();
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut feed_m = {
        let maker = maker.clone();
        let ticker = config.ticker.clone();
        let stop_rx = stop_rx.clone();
        tokio::spawn(async move { run_bbo_feed(&maker, ticker, "maker", cache_m_tx, stop_rx).await })
    };
    let mut feed_t = {
        let taker = taker.clone();
        let ticker = config.ticker.clone();
        let stop_rx = stop_rx.clone();
        tokio::spawn(async move { run_bbo_feed(&taker, ticker, "taker", cache_t_tx, stop_rx).await })
    };

    let datalog = match DataLog::new(std::path::Path::new("logs"), &config.exchange, &config.ticker) {
        Ok(log) => Some(log),
        Err(err) => {
            warn!(error = %err, "failed to open data log, continuing without CSV output");
            None
        }
    };

    let shutdown_deadline = config.shutdown_deadline;
    let slippage_pct = config.slippage_pct;
    let tick_m = maker_contract.tick_size;
    let tick_t = taker_contract.tick_size;
    let maker_contract_id = maker_contract.contract_id.clone();
    let taker_contract_id = taker_contract.contract_id.clone();
    let ticker = config.ticker.clone();

    let mut controller = TradeController::new(
        config,
        &maker,
        &taker,
        maker_contract,
        taker_contract,
        cache_m_rx,
        cache_t_rx,
        updates_m_rx,
        updates_t_rx,
        stop_rx.clone(),
        datalog,
    );

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    tokio::select! {
        _ = controller.run() => {
            warn!("trade controller exited its loop unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        res = &mut feed_m => {
            match res {
                Ok(Err(err)) => error!(error = %err, "maker bbo feed: fatal error, shutting down"),
                Err(join_err) => error!(error = %join_err, "maker bbo feed task panicked, shutting down"),
                Ok(Ok(())) => warn!("maker bbo feed: exited unexpectedly"),
            }
        }
        res = &mut feed_t => {
            match res {
                Ok(Err(err)) => error!(error = %err, "taker bbo feed: fatal error, shutting down"),
                Err(join_err) => error!(error = %join_err, "taker bbo feed task panicked, shutting down"),
                Ok(Ok(())) => warn!("taker bbo feed: exited unexpectedly"),
            }
        }
    }

    let datalog = controller.take_datalog();
    drop(controller);

    let coordinator = ShutdownCoordinator::new(shutdown_deadline);
    coordinator
        .run(
            &stop_tx,
            &maker,
            &taker,
            &maker_contract_id,
            &taker_contract_id,
            &ticker,
            tick_m,
            tick_t,
            slippage_pct,
            datalog,
        )
        .await;

    feed_m.abort();
    feed_t.abort();

    info!("engine stopped");
    std::process::exit(1);
}
