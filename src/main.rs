use log::*;
use service::{config::Config, logging::Logger};
use sse::{Backoff, Manager, Settings};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use web::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        "Starting stream bridge [{}] in {} mode",
        env!("CARGO_PKG_VERSION"),
        config.runtime_env()
    );

    let (channels, stream_channel) = match config.channels().and_then(|channels| {
        let stream_channel = config.stream_channel()?;
        Ok((channels, stream_channel))
    }) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("Invalid channel configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let redis = match store::init_redis(&config).await {
        Ok(redis) => redis,
        Err(e) => {
            error!("Failed to connect to Redis: {e}");
            return ExitCode::FAILURE;
        }
    };

    let settings = Settings {
        queue_capacity: config.session_queue_capacity,
        keep_alive: config.keep_alive(),
        backoff: Backoff::new(config.subscription_max_retries).with_delays(
            config.subscription_backoff_base(),
            config.subscription_backoff_max(),
        ),
        ..Settings::default()
    };

    let shutdown = CancellationToken::new();
    let manager = Arc::new(Manager::new(
        Arc::new(redis.history),
        Arc::new(redis.source),
        settings,
        shutdown.clone(),
    ));

    for channel in &channels {
        manager.start_channel(channel);
    }
    info!(
        "Bridging {} channel(s): {}",
        channels.len(),
        channels
            .iter()
            .map(|channel| channel.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    listen_for_signals(shutdown.clone());
    let faulted = watch_for_faults(&manager, shutdown.clone());

    let app_state = AppState::new(config, manager.clone(), stream_channel);
    let served = web::init_server(app_state, shutdown.clone()).await;

    shutdown.cancel();
    manager.shutdown();

    if let Err(e) = served {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    if faulted.load(Ordering::SeqCst) {
        error!("Exiting after an unrecoverable subscription fault");
        return ExitCode::FAILURE;
    }

    info!("Stream bridge stopped");
    ExitCode::SUCCESS
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
fn listen_for_signals(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to register ctrl-c handler: {e}");
                std::future::pending::<()>().await;
            }
        };

        let term = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to register SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = term => info!("Received SIGTERM, shutting down"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}

/// A subscription that exhausted its retries leaves the bridge unable to
/// serve its channel. Stop serving so a supervisor restarts the process.
fn watch_for_faults(manager: &Manager, shutdown: CancellationToken) -> Arc<AtomicBool> {
    let faulted = Arc::new(AtomicBool::new(false));
    let mut faults = manager.faults();

    let flag = faulted.clone();
    tokio::spawn(async move {
        let fault = tokio::select! {
            fault = faults.wait_for(Option::is_some) => fault.ok().and_then(|fault| fault.clone()),
            _ = shutdown.cancelled() => None,
        };

        if let Some(fault) = fault {
            error!("Unrecoverable subscription fault: {fault}");
            flag.store(true, Ordering::SeqCst);
            shutdown.cancel();
        }
    });

    faulted
}
