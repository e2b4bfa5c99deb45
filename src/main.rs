//! livechat-sync Agent
//!
//! Keeps an OBS browser source on the live chat of a YouTube channel's
//! current broadcast, and shares the live link with a peer device through
//! an append-only log.

mod config;
mod dispatch;
mod live;
mod logging;
mod obs;
mod resolver;
mod share;
mod sync;
#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use config::Config;
use dispatch::{Dispatcher, TimerLoop};
use obs::BrowserSource;
use resolver::YouTubeResolver;
use sync::{Session, SessionSignal};

fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config_override = config_path_arg(&args)?;

    let (_log_guard, log_dir) = logging::init_logging()?;
    info!("livechat-sync Agent starting (logs in {:?})", log_dir);

    // Load configuration
    let config = match &config_override {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let config_path = config.config_path()?;
    info!("Configuration loaded from {:?}", config_path);

    let settings = config
        .session_settings()
        .with_context(|| format!("Invalid configuration in {:?}", config_path))?;

    // Create tokio runtime for async operations
    let runtime = tokio::runtime::Runtime::new()?;

    let client = Arc::new(runtime.block_on(obs::connect(&config.obs))?);
    let mut signals = {
        let _guard = runtime.enter();
        obs::subscribe_session_signals(&client)?
    };

    let applier = BrowserSource::new(
        client.clone(),
        runtime.handle().clone(),
        config.source.name.clone(),
    );
    let resolver = Arc::new(YouTubeResolver::new(
        runtime.handle().clone(),
        config.channel.api_key.clone(),
    )?);
    if config.channel.api_key.is_some() {
        info!("YouTube Data API fallback enabled");
    }

    let timer_loop = Arc::new(TimerLoop::start().context("Failed to start host loop")?);
    let dispatcher = Arc::new(Dispatcher::new(
        Box::new(applier),
        timer_loop.clone(),
        config.dispatch_interval(),
    ));
    let session = Session::new(settings, dispatcher, timer_loop.clone(), resolver);

    let mut states = session.subscribe();
    runtime.spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!("Session state: {:?}", state);
        }
    });

    // Set up Ctrl+C handler that ends the signal loop
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = exit_tx.send(());
    })?;

    match runtime.block_on(obs::streaming_active(&client)) {
        Ok(true) => {
            info!("OBS is already streaming");
            session.handle(SessionSignal::Started);
        }
        Ok(false) => info!("Waiting for OBS to start streaming"),
        Err(e) => warn!("{:#}", e),
    }

    runtime.block_on(async {
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        info!("Stream signal: {:?}", signal);
                        tokio::task::block_in_place(|| session.handle(signal));
                    }
                    None => {
                        warn!("OBS connection closed");
                        break;
                    }
                },
                _ = exit_rx.recv() => break,
            }
        }
    });

    session.stop();
    timer_loop.shutdown();

    info!("Shutdown complete");
    Ok(())
}

/// Value of `--config <path>`, if given
fn config_path_arg(args: &[String]) -> Result<Option<PathBuf>> {
    let Some(pos) = args.iter().position(|a| a == "--config" || a == "-c") else {
        return Ok(None);
    };
    match args.get(pos + 1) {
        Some(path) if !path.starts_with('-') => Ok(Some(PathBuf::from(path))),
        _ => bail!("--config requires a file path"),
    }
}

fn print_help() {
    println!("livechat-sync Agent - Keeps an OBS browser source on a channel's live chat");
    println!();
    println!("USAGE:");
    println!("    livechat-sync-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    -c, --config <PATH>   Use this config file instead of the default");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                  Set log level (e.g., debug, info, warn)");
    println!("    LIVECHAT_SYNC_LOG_PATH    Directory for log files");
}
