use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    broadcast::{commands::CommandDispatcher, BroadcastManager},
    config::Config,
    events::EventBus,
    notify::LogNotifier,
    pomodoro::PomodoroTimer,
    probe::GenericProbe,
    server::{self, ServerContext},
    storage::{fallback::FallbackLog, store::FileRecordStore},
    tracker::ActivityTracker,
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod shutdown;

/// Represents the starting point for the daemon: builds every component,
/// wires the event flow, and runs until a shutdown signal.
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    std::env::set_current_dir("/")?;

    let config = Config::load(&dir)?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let store = Arc::new(FileRecordStore::new(&dir)?);
    let bus = Arc::new(EventBus::new(clock.clone()));
    let manager = Arc::new(BroadcastManager::new());
    server::register_event_forwarding(&bus, manager.clone());

    let probe = GenericProbe::new()?;
    let tracker = Arc::new(ActivityTracker::new(
        Box::new(probe),
        store.clone(),
        FallbackLog::new(&dir)?,
        bus.clone(),
        clock.clone(),
        config.update_interval(),
        config.error_backoff(),
    ));
    let sink = Arc::new(LogNotifier::new(config.notifications_enabled));
    let timer = Arc::new(PomodoroTimer::new(
        store,
        sink,
        bus.clone(),
        clock.clone(),
        config.pomodoro,
        config.auto_cycle,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        tracker.clone(),
        timer.clone(),
        clock.clone(),
    ));
    let context = Arc::new(ServerContext {
        manager,
        dispatcher,
        tracker: tracker.clone(),
        timer: timer.clone(),
        clock,
    });

    // Tracking is the point of the daemon; the pomodoro waits for a command.
    tracker.start_monitoring().await;

    let listener = server::bind(config.listen_port).await?;
    let shutdown_token = CancellationToken::new();

    let (_, serve_result, _) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        server::serve(context.clone(), listener, shutdown_token.clone()),
        server::broadcast_status_loop(
            context.clone(),
            config.update_interval(),
            shutdown_token.clone()
        ),
    );

    if let Err(serve_result) = serve_result {
        error!("Subscriber endpoint got an error {:?}", serve_result);
    }

    info!("Shutting down");
    tracker.stop_monitoring().await;
    timer.pause().await;

    Ok(())
}
