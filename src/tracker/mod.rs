//! Foreground-activity tracking: polls the probe, cuts the stream of focused
//! windows into sessions, scores and tags them, and persists them with a
//! file-based fallback when the record store misbehaves.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    events::{EventBus, EventPayload},
    probe::{ForegroundInfo, ForegroundProbe},
    storage::{entities::ActivitySessionEntity, fallback::FallbackLog, store::RecordStore},
    utils::clock::Clock,
};

pub mod analytics;
pub mod scoring;

pub use analytics::Analytics;

const EVENT_SOURCE: &str = "tracker";

/// How many of the day's sessions feed the aggregate daily score.
const DAILY_SCORE_LOG_LIMIT: usize = 1000;

/// Live snapshot of what the tracker is looking at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub active_app: Option<Arc<str>>,
    pub window_title: Option<Arc<str>>,
    pub elapsed_seconds: i64,
    pub is_monitoring: bool,
    /// Duration-weighted mean score over today's sessions.
    pub productivity_score: f64,
}

struct OpenSession {
    info: ForegroundInfo,
    start: DateTime<Utc>,
}

struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct TrackerState {
    monitor: Option<MonitorHandle>,
    current: Option<OpenSession>,
}

pub struct ActivityTracker {
    /// Serializes the public operations; never held by the polling loop.
    ops: Mutex<()>,
    state: Mutex<TrackerState>,
    probe: std::sync::Mutex<Box<dyn ForegroundProbe>>,
    store: Arc<dyn RecordStore>,
    fallback: FallbackLog,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    update_interval: Duration,
    error_backoff: Duration,
}

impl ActivityTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        probe: Box<dyn ForegroundProbe>,
        store: Arc<dyn RecordStore>,
        fallback: FallbackLog,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        update_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            ops: Mutex::new(()),
            state: Mutex::new(TrackerState::default()),
            probe: std::sync::Mutex::new(probe),
            store,
            fallback,
            bus,
            clock,
            update_interval,
            error_backoff,
        }
    }

    /// Starts the polling loop. Calling this while monitoring is already
    /// running is a no-op success; only one loop ever runs.
    pub async fn start_monitoring(self: &Arc<Self>) -> bool {
        let _op = self.ops.lock().await;
        let mut state = self.state.lock().await;
        if state.monitor.is_some() {
            return true;
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(self.clone().poll_loop(token.clone()));
        state.monitor = Some(MonitorHandle { token, task });
        info!("Focus monitoring started");
        true
    }

    /// Cancels the polling loop, waits for it to actually terminate, then
    /// finalizes the open session. No-op success when not monitoring.
    pub async fn stop_monitoring(&self) -> bool {
        let _op = self.ops.lock().await;
        let handle = self.state.lock().await.monitor.take();
        let Some(handle) = handle else {
            return true;
        };

        handle.token.cancel();
        if let Err(e) = handle.task.await {
            error!("Monitoring task failed to shut down cleanly: {e:?}");
        }

        let open = self.state.lock().await.current.take();
        if let Some(open) = open {
            self.close_session(open, self.clock.time()).await;
        }
        info!("Focus monitoring stopped");
        true
    }

    /// Finalizes the open session without stopping monitoring; the loop
    /// opens a fresh one on its next tick.
    pub async fn reset_session(&self) -> bool {
        let _op = self.ops.lock().await;
        let open = self.state.lock().await.current.take();
        if let Some(open) = open {
            self.close_session(open, self.clock.time()).await;
        }
        info!("Focus session reset");
        true
    }

    pub async fn get_current_status(&self) -> TrackerStatus {
        let (info, start, is_monitoring) = {
            let state = self.state.lock().await;
            (
                state
                    .current
                    .as_ref()
                    .map(|open| open.info.clone())
                    .unwrap_or_default(),
                state.current.as_ref().map(|open| open.start),
                state.monitor.is_some(),
            )
        };

        let elapsed_seconds = start
            .map(|start| (self.clock.time() - start).num_seconds().max(0))
            .unwrap_or(0);

        let today = self.clock.today();
        let logs = self.get_activity_logs(today, DAILY_SCORE_LOG_LIMIT).await;

        TrackerStatus {
            active_app: info.app,
            window_title: info.title,
            elapsed_seconds,
            is_monitoring,
            productivity_score: analytics::weighted_score(&logs),
        }
    }

    /// Sessions persisted for a date, newest first. The fallback log answers
    /// when the record store fails or has nothing.
    pub async fn get_activity_logs(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Vec<ActivitySessionEntity> {
        match self.store.get_activity_logs(date, limit).await {
            Ok(logs) if !logs.is_empty() => return logs,
            Ok(_) => {}
            Err(e) => error!("Record store query for {date} failed: {e:?}"),
        }

        match self.fallback.read_day(date, limit).await {
            Ok(logs) => logs,
            Err(e) => {
                error!("Fallback log query for {date} failed: {e:?}");
                vec![]
            }
        }
    }

    pub async fn get_analytics(&self, date: NaiveDate) -> Analytics {
        let logs = self.get_activity_logs(date, usize::MAX).await;
        analytics::aggregate(&logs)
    }

    /// Polling loop. Probe failures are survived with a longer backoff.
    async fn poll_loop(self: Arc<Self>, token: CancellationToken) {
        info!("Starting monitoring loop");
        loop {
            let delay = match self.poll_once().await {
                Ok(()) => self.update_interval,
                Err(e) => {
                    error!("Monitoring loop error: {e:?}");
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Monitoring loop stopped");
                    return;
                }
                _ = self.clock.sleep(delay) => ()
            }
        }
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let info = {
            let mut probe = self.probe.lock().expect("Probe lock poisoned");
            probe.get_foreground_info()?
        };
        let now = self.clock.time();

        let closed = {
            let mut state = self.state.lock().await;
            let changed = state
                .current
                .as_ref()
                .map(|open| open.info != info)
                .unwrap_or(true);
            if !changed {
                return Ok(());
            }
            state.current.replace(OpenSession {
                info: info.clone(),
                start: now,
            })
        };

        debug!("Window changed: {:?} - {:?}", info.app, info.title);
        if let Some(open) = closed {
            self.close_session(open, now).await;
        }

        self.bus
            .emit_async(
                EventPayload::WindowChanged {
                    app: info.app,
                    title: info.title,
                },
                EVENT_SOURCE,
            )
            .await;
        let status = self.get_current_status().await;
        self.bus
            .emit_async(EventPayload::FocusStatusChanged(status), EVENT_SOURCE)
            .await;
        Ok(())
    }

    /// Scores, tags and persists a finished session, then announces it.
    /// Sessions that never had an application are dropped.
    async fn close_session(&self, open: OpenSession, end: DateTime<Utc>) {
        let Some(app) = open.info.app else {
            debug!("Discarding session without an application");
            return;
        };
        let title = open.info.title.unwrap_or_else(|| "".into());

        let duration_seconds =
            ((end - open.start).num_milliseconds() as f64 / 1000.).max(0.);
        let session = ActivitySessionEntity {
            productivity_score: scoring::score(&app, &title, duration_seconds),
            tag: scoring::classify(&app, &title),
            app,
            title,
            start: open.start,
            end,
            duration_seconds,
        };

        self.persist(&session).await;
        debug!("Session saved: {} ({:.1}s)", session.app, session.duration_seconds);
        self.bus
            .emit_async(EventPayload::ActivityLogged(session), EVENT_SOURCE)
            .await;
    }

    /// A store failure falls through to the fallback log; neither aborts the
    /// polling loop.
    async fn persist(&self, session: &ActivitySessionEntity) {
        if let Err(e) = self.store.create_activity_log(session.clone()).await {
            error!("Failed to save session to the record store: {e:?}");
            if let Err(e) = self.fallback.append(session).await {
                error!("Failed to save session to the fallback log: {e:?}");
            }
        }
    }
}
