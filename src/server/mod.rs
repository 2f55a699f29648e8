//! Localhost subscriber endpoint: one line-delimited JSON message per line,
//! duplex. The transport stays here; the Broadcast Manager only ever sees
//! [SubscriberConnection]s.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::FutureExt;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::{commands::CommandDispatcher, BroadcastManager, OutboundMessage, SubscriberConnection},
    events::{EventBus, EventKind},
    pomodoro::PomodoroTimer,
    tracker::ActivityTracker,
    utils::clock::Clock,
};

/// Outbound messages a subscriber may lag behind before it counts as dead.
const OUTBOUND_BUFFER: usize = 64;

/// Everything a live connection needs to serve its subscriber.
pub struct ServerContext {
    pub manager: Arc<BroadcastManager>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub tracker: Arc<ActivityTracker>,
    pub timer: Arc<PomodoroTimer>,
    pub clock: Arc<dyn Clock>,
}

/// Queue-backed [SubscriberConnection]; a writer task drains the queue to
/// the socket. A full queue means the subscriber stopped reading, which is a
/// send failure like any other.
struct ChannelConnection {
    sender: mpsc::Sender<String>,
}

#[async_trait]
impl SubscriberConnection for ChannelConnection {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let line = serde_json::to_string(message)?;
        self.sender
            .try_send(line)
            .map_err(|_| anyhow!("Subscriber queue closed or full"))
    }
}

/// Forwards every broadcast-worthy bus event to the connection set.
pub fn register_event_forwarding(bus: &EventBus, manager: Arc<BroadcastManager>) {
    const FORWARDED: &[EventKind] = &[
        EventKind::FocusStatusChanged,
        EventKind::WindowChanged,
        EventKind::ActivityLogged,
        EventKind::PomodoroStarted,
        EventKind::PomodoroPaused,
        EventKind::PomodoroCompleted,
        EventKind::PomodoroPhaseChanged,
        EventKind::PomodoroTick,
    ];

    for kind in FORWARDED {
        let manager = manager.clone();
        bus.subscribe_async(*kind, move |event| {
            let manager = manager.clone();
            async move {
                manager.broadcast(&OutboundMessage::from_event(&event)).await;
                Ok(())
            }
            .boxed()
        });
    }
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    info!("Subscriber endpoint listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept loop. Each subscriber gets its own task; cancellation stops the
/// accepting and every connection.
pub async fn serve(
    context: Arc<ServerContext>,
    listener: TcpListener,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    debug!("Accepted subscriber from {address}");
                    tokio::spawn(handle_subscriber(context.clone(), stream, token.clone()));
                }
                Err(e) => warn!("Accept failed: {e:?}"),
            }
        }
    }
}

async fn handle_subscriber(
    context: Arc<ServerContext>,
    stream: TcpStream,
    token: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();

    let (sender, mut receiver) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        let mut write = BufWriter::new(write_half);
        while let Some(line) = receiver.recv().await {
            let write_line = async {
                write.write_all(line.as_bytes()).await?;
                write.write_all(b"\n").await?;
                write.flush().await
            };
            if write_line.await.is_err() {
                return;
            }
        }
    });

    let id = context
        .manager
        .connect(Arc::new(ChannelConnection { sender }))
        .await;

    // Snapshot of both components the moment the subscriber arrives.
    let initial = OutboundMessage::InitialStatus {
        timestamp: context.clock.time(),
        focus: context.tracker.get_current_status().await,
        pomodoro: context.timer.get_status().await,
    };
    context.manager.send_to_one(id, &initial).await;

    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    let reply = context.dispatcher.dispatch_line(&line).await;
                    context.manager.send_to_one(id, &reply).await;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!("Subscriber read failed: {e:?}");
                    break;
                }
            }
        }
    }

    context.manager.disconnect(id).await;
    writer.abort();
}

/// Periodic `status_update` push. Skips the work entirely while nobody is
/// listening.
pub async fn broadcast_status_loop(
    context: Arc<ServerContext>,
    interval: Duration,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = context.clock.sleep(interval) => ()
        }

        if context.manager.connection_count().await == 0 {
            continue;
        }

        let message = OutboundMessage::StatusUpdate {
            timestamp: context.clock.time(),
            focus: context.tracker.get_current_status().await,
            pomodoro: context.timer.get_status().await,
        };
        context.manager.broadcast(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::{
        config::PomodoroConfig,
        events::EventBus,
        notify::MockNotificationSink,
        probe::{ForegroundInfo, MockForegroundProbe},
        storage::{fallback::FallbackLog, store::MockRecordStore},
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    use super::*;

    fn test_context() -> (Arc<ServerContext>, tempfile::TempDir) {
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let bus = Arc::new(EventBus::new(clock.clone()));
        let manager = Arc::new(BroadcastManager::new());
        register_event_forwarding(&bus, manager.clone());

        let mut probe = MockForegroundProbe::new();
        probe
            .expect_get_foreground_info()
            .returning(|| Ok(ForegroundInfo::unknown()));
        let mut store = MockRecordStore::new();
        store.expect_get_activity_logs().returning(|_, _| Ok(vec![]));
        store.expect_create_activity_log().returning(|_| Ok(()));
        store.expect_create_pomodoro_session().returning(|_| Ok(1));
        store.expect_update_pomodoro_session().returning(|_, _| Ok(()));
        let store: Arc<dyn crate::storage::store::RecordStore> = Arc::new(store);

        let dir = tempdir().unwrap();
        let tracker = Arc::new(ActivityTracker::new(
            Box::new(probe),
            store.clone(),
            FallbackLog::new(dir.path()).unwrap(),
            bus.clone(),
            clock.clone(),
            Duration::from_millis(10),
            Duration::from_millis(10),
        ));
        let mut sink = MockNotificationSink::new();
        sink.expect_notify().returning(|_, _| ());
        let timer = Arc::new(PomodoroTimer::new(
            store,
            Arc::new(sink),
            bus,
            clock.clone(),
            PomodoroConfig::default(),
            false,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            tracker.clone(),
            timer.clone(),
            clock.clone(),
        ));

        (
            Arc::new(ServerContext {
                manager,
                dispatcher,
                tracker,
                timer,
                clock,
            }),
            dir,
        )
    }

    async fn next_message(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    ) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("Timed out waiting for a server message")
            .unwrap()
            .expect("Server closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// End to end over a real socket: initial snapshot, ping, a command.
    #[tokio::test]
    async fn test_subscriber_session_over_socket() {
        *TEST_LOGGING;
        let (context, _dir) = test_context();
        let listener = bind(0).await.unwrap();
        let address = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(context.clone(), listener, token.clone()));

        let stream = TcpStream::connect(address).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let initial = next_message(&mut lines).await;
        assert_eq!(initial["type"], "initial_status");
        assert_eq!(initial["pomodoro"]["phase"], "Focus");
        assert_eq!(initial["focus"]["is_monitoring"], false);

        write_half
            .write_all(b"{\"command\": \"ping\"}\n")
            .await
            .unwrap();
        let pong = next_message(&mut lines).await;
        assert_eq!(pong["type"], "pong");

        write_half
            .write_all(b"{\"command\": \"start_pomodoro\"}\n")
            .await
            .unwrap();
        // The start emits a pomodoro_update broadcast and the command reply;
        // both arrive, in either order.
        let first = next_message(&mut lines).await;
        let second = next_message(&mut lines).await;
        let types = [first["type"].clone(), second["type"].clone()];
        assert!(types.contains(&Value::String("command_response".into())));
        assert!(types.contains(&Value::String("pomodoro_update".into())));

        assert_eq!(context.manager.connection_count().await, 1);
        context.timer.pause().await;
        token.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_prunes_connection() {
        *TEST_LOGGING;
        let (context, _dir) = test_context();
        let listener = bind(0).await.unwrap();
        let address = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        tokio::spawn(serve(context.clone(), listener, token.clone()));

        let stream = TcpStream::connect(address).await.unwrap();
        // Wait until the server registered us.
        for _ in 0..100 {
            if context.manager.connection_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(context.manager.connection_count().await, 1);

        drop(stream);
        for _ in 0..100 {
            if context.manager.connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(context.manager.connection_count().await, 0);
        token.cancel();
    }
}
