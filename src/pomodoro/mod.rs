//! Pomodoro phase state machine and countdown loop. Session records go
//! through the record store best-effort; a storage failure never stops the
//! timer.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::PomodoroConfig,
    events::{EventBus, EventPayload},
    notify::NotificationSink,
    storage::{
        entities::{NewPomodoroSession, Phase, PomodoroPatch, PomodoroSessionId},
        store::RecordStore,
    },
    utils::clock::Clock,
};

const EVENT_SOURCE: &str = "pomodoro";

/// Periodic countdown updates go out every this many ticks, to bound
/// broadcast volume.
const TICK_UPDATE_INTERVAL: u32 = 10;

/// Snapshot of the timer for subscribers and the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PomodoroStatus {
    pub phase: Phase,
    pub seconds_left: u32,
    pub cycle_count: u32,
    pub is_running: bool,
    pub auto_cycle: bool,
    pub configuration: PomodoroConfig,
}

/// Partial configuration update; missing fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub focus_minutes: Option<u32>,
    pub short_break_minutes: Option<u32>,
    pub long_break_minutes: Option<u32>,
    pub auto_cycle: Option<bool>,
}

struct CountdownHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct OpenSession {
    /// Missing when the store refused the create; the timer keeps running.
    id: Option<PomodoroSessionId>,
    start: DateTime<Utc>,
}

struct TimerState {
    phase: Phase,
    seconds_left: u32,
    cycle_count: u32,
    is_running: bool,
    auto_cycle: bool,
    config: PomodoroConfig,
    countdown: Option<CountdownHandle>,
    session: Option<OpenSession>,
}

fn phase_duration(config: &PomodoroConfig, phase: Phase) -> u32 {
    let minutes = match phase {
        Phase::Focus => config.focus_minutes,
        Phase::ShortBreak => config.short_break_minutes,
        Phase::LongBreak => config.long_break_minutes,
    };
    minutes * 60
}

fn snapshot(state: &TimerState) -> PomodoroStatus {
    PomodoroStatus {
        phase: state.phase,
        seconds_left: state.seconds_left,
        cycle_count: state.cycle_count,
        is_running: state.is_running,
        auto_cycle: state.auto_cycle,
        configuration: state.config,
    }
}

pub struct PomodoroTimer {
    /// Serializes the public operations; never held by the countdown loop.
    ops: Mutex<()>,
    state: Mutex<TimerState>,
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn NotificationSink>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl PomodoroTimer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn NotificationSink>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: PomodoroConfig,
        auto_cycle: bool,
    ) -> Self {
        Self {
            ops: Mutex::new(()),
            state: Mutex::new(TimerState {
                phase: Phase::Focus,
                seconds_left: phase_duration(&config, Phase::Focus),
                cycle_count: 0,
                is_running: false,
                auto_cycle,
                config,
                countdown: None,
                session: None,
            }),
            store,
            sink,
            bus,
            clock,
        }
    }

    pub async fn get_status(&self) -> PomodoroStatus {
        snapshot(&*self.state.lock().await)
    }

    /// Starts or resumes the countdown. No-op success while already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let _op = self.ops.lock().await;
        let status = {
            let mut state = self.state.lock().await;
            if state.is_running {
                return true;
            }

            if state.seconds_left == 0 {
                state.seconds_left = phase_duration(&state.config, state.phase);
            }
            if state.session.is_none() {
                self.open_session(&mut state).await;
            }
            state.is_running = true;

            let token = CancellationToken::new();
            let task = tokio::spawn(self.clone().countdown_loop(token.clone()));
            state.countdown = Some(CountdownHandle { token, task });

            info!("Pomodoro {} started ({}s)", state.phase, state.seconds_left);
            snapshot(&state)
        };

        self.bus
            .emit_async(EventPayload::PomodoroStarted(status), EVENT_SOURCE)
            .await;
        true
    }

    /// Stops the countdown and records the elapsed time on the open session.
    /// No-op success while not running.
    pub async fn pause(&self) -> bool {
        let _op = self.ops.lock().await;
        if !self.pause_inner().await {
            return true;
        }

        info!("Pomodoro paused");
        let status = self.get_status().await;
        self.bus
            .emit_async(EventPayload::PomodoroPaused(status), EVENT_SOURCE)
            .await;
        true
    }

    /// Abandons the current phase: the open session is recorded as skipped
    /// and the timer moves to the next phase, stopped.
    pub async fn skip(&self) -> bool {
        let _op = self.ops.lock().await;
        self.pause_inner().await;
        self.finalize_session(false, true).await;

        let status = {
            let mut state = self.state.lock().await;
            self.transition_phase(&mut state);
            snapshot(&state)
        };

        info!("Pomodoro phase skipped to {}", status.phase);
        self.bus
            .emit_async(EventPayload::PomodoroPhaseChanged(status), EVENT_SOURCE)
            .await;
        true
    }

    /// Back to a fresh Focus phase with zero completed cycles.
    pub async fn reset(&self) -> bool {
        let _op = self.ops.lock().await;
        self.pause_inner().await;
        self.finalize_session(false, false).await;

        let status = {
            let mut state = self.state.lock().await;
            state.phase = Phase::Focus;
            state.cycle_count = 0;
            state.seconds_left = phase_duration(&state.config, Phase::Focus);
            snapshot(&state)
        };

        info!("Pomodoro reset");
        self.bus
            .emit_async(EventPayload::PomodoroTick(status), EVENT_SOURCE)
            .await;
        true
    }

    /// Merges a partial configuration. While stopped, the current phase's
    /// remaining time snaps to the new duration.
    pub async fn update_config(&self, patch: ConfigPatch) -> bool {
        let _op = self.ops.lock().await;
        let status = {
            let mut state = self.state.lock().await;
            if let Some(v) = patch.focus_minutes {
                state.config.focus_minutes = v;
            }
            if let Some(v) = patch.short_break_minutes {
                state.config.short_break_minutes = v;
            }
            if let Some(v) = patch.long_break_minutes {
                state.config.long_break_minutes = v;
            }
            if let Some(v) = patch.auto_cycle {
                state.auto_cycle = v;
            }

            if !state.is_running {
                state.seconds_left = phase_duration(&state.config, state.phase);
            }
            snapshot(&state)
        };

        info!("Pomodoro configuration updated");
        self.bus
            .emit_async(EventPayload::PomodoroTick(status), EVENT_SOURCE)
            .await;
        true
    }

    /// One tick per second while running. On zero the session completes, the
    /// phase transitions, and with auto-cycle on the loop opens the next
    /// session after a one second pause and keeps going.
    async fn countdown_loop(self: Arc<Self>, token: CancellationToken) {
        debug!("Starting countdown loop");
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = self.clock.sleep(Duration::from_secs(1)) => ()
            }

            enum Tick {
                Quiet,
                Update(PomodoroStatus),
                Completed,
            }

            let tick = {
                let mut state = self.state.lock().await;
                if !state.is_running {
                    return;
                }
                state.seconds_left = state.seconds_left.saturating_sub(1);
                if state.seconds_left == 0 {
                    Tick::Completed
                } else if state.seconds_left % TICK_UPDATE_INTERVAL == 0 {
                    Tick::Update(snapshot(&state))
                } else {
                    Tick::Quiet
                }
            };

            match tick {
                Tick::Quiet => {}
                Tick::Update(status) => {
                    self.bus
                        .emit_async(EventPayload::PomodoroTick(status), EVENT_SOURCE)
                        .await;
                }
                Tick::Completed => {
                    self.finalize_session(true, false).await;

                    let (status, completed_focus) = {
                        let mut state = self.state.lock().await;
                        let previous = state.phase;
                        self.transition_phase(&mut state);
                        (snapshot(&state), previous == Phase::Focus)
                    };

                    self.bus
                        .emit_async(
                            EventPayload::PomodoroCompleted(status.clone()),
                            EVENT_SOURCE,
                        )
                        .await;
                    self.bus
                        .emit_async(
                            EventPayload::PomodoroPhaseChanged(status.clone()),
                            EVENT_SOURCE,
                        )
                        .await;
                    if completed_focus {
                        self.check_achievements(status.cycle_count);
                    }

                    if !status.auto_cycle {
                        let mut state = self.state.lock().await;
                        state.is_running = false;
                        state.countdown = None;
                        return;
                    }

                    // Brief pause between phases, then straight into the
                    // next one.
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = self.clock.sleep(Duration::from_secs(1)) => ()
                    }
                    let status = {
                        let mut state = self.state.lock().await;
                        if !state.is_running {
                            return;
                        }
                        self.open_session(&mut state).await;
                        info!("Pomodoro {} started ({}s)", state.phase, state.seconds_left);
                        snapshot(&state)
                    };
                    self.bus
                        .emit_async(EventPayload::PomodoroStarted(status), EVENT_SOURCE)
                        .await;
                }
            }
        }
    }

    /// Stops the loop and waits for it to terminate, recording the elapsed
    /// time. Returns false when there was nothing to pause.
    async fn pause_inner(&self) -> bool {
        let handle = {
            let mut state = self.state.lock().await;
            if !state.is_running {
                return false;
            }
            state.is_running = false;
            state.countdown.take()
        };

        if let Some(handle) = handle {
            handle.token.cancel();
            if let Err(e) = handle.task.await {
                error!("Countdown task failed to shut down cleanly: {e:?}");
            }
        }

        let session = {
            let state = self.state.lock().await;
            state.session.as_ref().map(|open| (open.id, open.start))
        };
        if let Some((Some(id), start)) = session {
            let actual_duration = (self.clock.time() - start).num_seconds().max(0);
            self.update_session(
                id,
                PomodoroPatch {
                    actual_duration: Some(actual_duration),
                    ..Default::default()
                },
            )
            .await;
        }
        true
    }

    /// Creates the session record for the current phase, best-effort.
    async fn open_session(&self, state: &mut TimerState) {
        let start = self.clock.time();
        let cycle_number = if state.phase == Phase::Focus {
            state.cycle_count + 1
        } else {
            state.cycle_count
        };
        let new_session = NewPomodoroSession {
            phase: state.phase,
            planned_duration: state.seconds_left as i64,
            cycle_number,
            start,
        };

        let id = match self.store.create_pomodoro_session(new_session).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to create pomodoro session record: {e:?}");
                None
            }
        };
        state.session = Some(OpenSession { id, start });
    }

    /// Closes the open session record with its outcome, best-effort.
    async fn finalize_session(&self, completed: bool, skipped: bool) {
        let session = self.state.lock().await.session.take();
        let Some(session) = session else {
            return;
        };
        let Some(id) = session.id else {
            return;
        };

        let now = self.clock.time();
        let actual_duration = (now - session.start).num_seconds().max(0);
        self.update_session(
            id,
            PomodoroPatch {
                actual_duration: Some(actual_duration),
                completed: Some(completed),
                skipped: Some(skipped),
                end: Some(now),
            },
        )
        .await;
        debug!("Closed pomodoro session {id} (completed={completed}, skipped={skipped})");
    }

    async fn update_session(&self, id: PomodoroSessionId, patch: PomodoroPatch) {
        if let Err(e) = self.store.update_pomodoro_session(id, patch).await {
            error!("Failed to update pomodoro session {id}: {e:?}");
        }
    }

    /// From Focus the finished cycle decides the break length; any break
    /// returns to Focus. `seconds_left` always snaps to the full duration of
    /// the phase being entered.
    fn transition_phase(&self, state: &mut TimerState) {
        let previous = state.phase;
        if previous == Phase::Focus {
            state.cycle_count += 1;
            let long_break = state.config.long_break_cycle > 0
                && state.cycle_count % state.config.long_break_cycle == 0;
            state.phase = if long_break {
                Phase::LongBreak
            } else {
                Phase::ShortBreak
            };
        } else {
            state.phase = Phase::Focus;
        }
        state.seconds_left = phase_duration(&state.config, state.phase);

        self.sink.notify(
            "Pomodoro Timer",
            &format!("{previous} complete! Starting {}", state.phase),
        );
        info!(
            "Phase transition: {previous} -> {} (Cycle {})",
            state.phase, state.cycle_count
        );
    }

    /// Small milestones for completed (never skipped) focus phases.
    fn check_achievements(&self, cycle_count: u32) {
        let achievement = if cycle_count == 1 {
            Some(("First Pomodoro", "Completed your first focus session!".to_string()))
        } else if cycle_count == 4 {
            Some(("Pomodoro Pro", "Completed 4 focus sessions!".to_string()))
        } else if cycle_count % 10 == 0 {
            Some(("Focus Master", format!("Completed {cycle_count} focus sessions!")))
        } else {
            None
        };

        if let Some((title, message)) = achievement {
            info!("Achievement unlocked: {title}");
            self.sink.notify(title, &message);
        }
    }
}
