//! Commands subscribers may send over their channel, and their dispatch
//! into the tracker and the timer. A malformed command is rejected without
//! touching any component state.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::{
    pomodoro::PomodoroTimer, tracker::ActivityTracker, utils::clock::Clock,
};

use super::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    StartFocus,
    StopFocus,
    StartPomodoro,
    PausePomodoro,
    Ping,
}

pub struct CommandDispatcher {
    tracker: Arc<ActivityTracker>,
    timer: Arc<PomodoroTimer>,
    clock: Arc<dyn Clock>,
}

impl CommandDispatcher {
    pub fn new(
        tracker: Arc<ActivityTracker>,
        timer: Arc<PomodoroTimer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            timer,
            clock,
        }
    }

    /// Parses one inbound line and runs it. Parse failures become `error`
    /// replies for the sender.
    pub async fn dispatch_line(&self, line: &str) -> OutboundMessage {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                return OutboundMessage::Error {
                    message: "Invalid JSON format".into(),
                }
            }
        };

        match serde_json::from_value::<Command>(value.clone()) {
            Ok(command) => self.dispatch(command).await,
            Err(_) => {
                let name = value
                    .get("command")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<missing>");
                OutboundMessage::Error {
                    message: format!("Unknown command: {name}"),
                }
            }
        }
    }

    pub async fn dispatch(&self, command: Command) -> OutboundMessage {
        debug!("Dispatching command {command:?}");
        match command {
            Command::StartFocus => command_response(
                "start_focus",
                self.tracker.start_monitoring().await,
                "Focus monitoring started",
                "Failed to start",
            ),
            Command::StopFocus => command_response(
                "stop_focus",
                self.tracker.stop_monitoring().await,
                "Focus monitoring stopped",
                "Failed to stop",
            ),
            Command::StartPomodoro => command_response(
                "start_pomodoro",
                self.timer.start().await,
                "Pomodoro started",
                "Failed to start",
            ),
            Command::PausePomodoro => command_response(
                "pause_pomodoro",
                self.timer.pause().await,
                "Pomodoro paused",
                "Failed to pause",
            ),
            Command::Ping => OutboundMessage::Pong {
                timestamp: self.clock.time(),
            },
        }
    }
}

fn command_response(
    command: &str,
    success: bool,
    success_message: &str,
    failure_message: &str,
) -> OutboundMessage {
    OutboundMessage::CommandResponse {
        command: command.into(),
        success,
        message: if success {
            success_message.into()
        } else {
            failure_message.into()
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use crate::{
        config::PomodoroConfig,
        events::EventBus,
        notify::MockNotificationSink,
        probe::{ForegroundInfo, MockForegroundProbe},
        storage::{fallback::FallbackLog, store::MockRecordStore},
        utils::clock::DefaultClock,
    };

    use super::*;

    fn dispatcher() -> (CommandDispatcher, Arc<ActivityTracker>, tempfile::TempDir) {
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let bus = Arc::new(EventBus::new(clock.clone()));

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

        (
            CommandDispatcher::new(tracker.clone(), timer, clock),
            tracker,
            dir,
        )
    }

    #[tokio::test]
    async fn test_ping_pongs() {
        let (dispatcher, _, _dir) = dispatcher();
        let reply = dispatcher.dispatch_line(r#"{"command": "ping"}"#).await;
        assert!(matches!(reply, OutboundMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn test_start_and_stop_focus() {
        let (dispatcher, tracker, _dir) = dispatcher();

        let reply = dispatcher.dispatch_line(r#"{"command": "start_focus"}"#).await;
        match reply {
            OutboundMessage::CommandResponse { command, success, .. } => {
                assert_eq!(command, "start_focus");
                assert!(success);
            }
            other => panic!("Unexpected reply {other:?}"),
        }
        assert!(tracker.get_current_status().await.is_monitoring);

        dispatcher.dispatch_line(r#"{"command": "stop_focus"}"#).await;
        assert!(!tracker.get_current_status().await.is_monitoring);
    }

    #[tokio::test]
    async fn test_pomodoro_commands() {
        let (dispatcher, _, _dir) = dispatcher();

        let reply = dispatcher.dispatch(Command::StartPomodoro).await;
        assert!(matches!(
            reply,
            OutboundMessage::CommandResponse { success: true, .. }
        ));
        let reply = dispatcher.dispatch(Command::PausePomodoro).await;
        assert!(matches!(
            reply,
            OutboundMessage::CommandResponse { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected_without_side_effects() {
        let (dispatcher, tracker, _dir) = dispatcher();

        let reply = dispatcher
            .dispatch_line(r#"{"command": "launch_missiles"}"#)
            .await;
        match reply {
            OutboundMessage::Error { message } => {
                assert!(message.contains("launch_missiles"), "{message}");
            }
            other => panic!("Unexpected reply {other:?}"),
        }
        assert!(!tracker.get_current_status().await.is_monitoring);
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let (dispatcher, _, _dir) = dispatcher();
        let reply = dispatcher.dispatch_line("{nope").await;
        assert!(matches!(reply, OutboundMessage::Error { .. }));
    }
}
