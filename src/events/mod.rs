//! In-process publish/subscribe router between the stateful components and
//! the broadcast layer. Dispatch is keyed by [EventKind]; payloads are a
//! closed union, so consumers match exhaustively instead of poking at maps.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use tracing::{debug, error};

use crate::{
    pomodoro::PomodoroStatus, storage::entities::ActivitySessionEntity, tracker::TrackerStatus,
    utils::clock::Clock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FocusStatusChanged,
    WindowChanged,
    ActivityLogged,
    PomodoroStarted,
    PomodoroPaused,
    PomodoroCompleted,
    PomodoroPhaseChanged,
    PomodoroTick,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    FocusStatusChanged(TrackerStatus),
    WindowChanged {
        app: Option<Arc<str>>,
        title: Option<Arc<str>>,
    },
    ActivityLogged(ActivitySessionEntity),
    PomodoroStarted(PomodoroStatus),
    PomodoroPaused(PomodoroStatus),
    PomodoroCompleted(PomodoroStatus),
    PomodoroPhaseChanged(PomodoroStatus),
    PomodoroTick(PomodoroStatus),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::FocusStatusChanged(_) => EventKind::FocusStatusChanged,
            EventPayload::WindowChanged { .. } => EventKind::WindowChanged,
            EventPayload::ActivityLogged(_) => EventKind::ActivityLogged,
            EventPayload::PomodoroStarted(_) => EventKind::PomodoroStarted,
            EventPayload::PomodoroPaused(_) => EventKind::PomodoroPaused,
            EventPayload::PomodoroCompleted(_) => EventKind::PomodoroCompleted,
            EventPayload::PomodoroPhaseChanged(_) => EventKind::PomodoroPhaseChanged,
            EventPayload::PomodoroTick(_) => EventKind::PomodoroTick,
        }
    }
}

/// A state change travelling from a producer to subscribers. Never persisted.
#[derive(Debug, Clone)]
pub struct Event {
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
}

type SyncSubscriber = Box<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;
type AsyncSubscriber = Box<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct EventBus {
    clock: Arc<dyn Clock>,
    sync_subscribers: Mutex<HashMap<EventKind, Vec<SyncSubscriber>>>,
    async_subscribers: Mutex<HashMap<EventKind, Vec<AsyncSubscriber>>>,
}

impl EventBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sync_subscribers: Mutex::new(HashMap::new()),
            async_subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a synchronous subscriber. Subscribers of one kind are
    /// invoked in registration order.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.sync_subscribers
            .lock()
            .expect("Subscriber registry poisoned")
            .entry(kind)
            .or_default()
            .push(Box::new(callback));
        debug!("Subscribed to event kind {kind:?}");
    }

    /// Registers an asynchronous subscriber. All async subscribers of one
    /// kind run concurrently with each other on emission.
    pub fn subscribe_async(
        &self,
        kind: EventKind,
        callback: impl Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    ) {
        self.async_subscribers
            .lock()
            .expect("Subscriber registry poisoned")
            .entry(kind)
            .or_default()
            .push(Box::new(callback));
        debug!("Subscribed to async event kind {kind:?}");
    }

    /// Invokes the synchronous subscribers for the payload's kind. One
    /// failing subscriber never blocks the others.
    pub fn emit(&self, payload: EventPayload, source: &'static str) {
        let event = self.build_event(payload, source);
        self.emit_sync_inner(&event);
    }

    /// Runs every async subscriber for the payload's kind concurrently,
    /// waits for all of them, then invokes the synchronous subscribers.
    /// Failures are logged and swallowed in both groups.
    pub async fn emit_async(&self, payload: EventPayload, source: &'static str) {
        let event = self.build_event(payload, source);

        let futures = {
            let registry = self
                .async_subscribers
                .lock()
                .expect("Subscriber registry poisoned");
            match registry.get(&event.payload.kind()) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|callback| callback(event.clone()))
                    .collect::<Vec<_>>(),
                None => vec![],
            }
        };

        for result in join_all(futures).await {
            if let Err(e) = result {
                error!("Async subscriber failed for {:?}: {e:?}", event.payload.kind());
            }
        }

        self.emit_sync_inner(&event);
    }

    fn build_event(&self, payload: EventPayload, source: &'static str) -> Event {
        Event {
            payload,
            timestamp: self.clock.time(),
            source,
        }
    }

    fn emit_sync_inner(&self, event: &Event) {
        let registry = self
            .sync_subscribers
            .lock()
            .expect("Subscriber registry poisoned");
        let Some(subscribers) = registry.get(&event.payload.kind()) else {
            return;
        };
        for callback in subscribers {
            if let Err(e) = callback(event) {
                error!("Subscriber failed for {:?}: {e:?}", event.payload.kind());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use futures::FutureExt;
    use tokio::sync::Barrier;

    use crate::utils::clock::DefaultClock;

    use super::*;

    fn window_changed(app: &str) -> EventPayload {
        EventPayload::WindowChanged {
            app: Some(app.into()),
            title: None,
        }
    }

    fn bus() -> EventBus {
        EventBus::new(Arc::new(DefaultClock))
    }

    #[test]
    fn test_sync_subscribers_run_in_registration_order() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let seen = seen.clone();
            bus.subscribe(EventKind::WindowChanged, move |_| {
                seen.lock().unwrap().push(id);
                Ok(())
            });
        }

        bus.emit(window_changed("code"), "test");
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::WindowChanged, |_| Err(anyhow!("broken")));
        {
            let seen = seen.clone();
            bus.subscribe(EventKind::WindowChanged, move |_| {
                seen.lock().unwrap().push("ok");
                Ok(())
            });
        }

        bus.emit(window_changed("code"), "test");
        assert_eq!(*seen.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn test_subscribers_only_see_their_kind() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(0));
        {
            let seen = seen.clone();
            bus.subscribe(EventKind::ActivityLogged, move |_| {
                *seen.lock().unwrap() += 1;
                Ok(())
            });
        }

        bus.emit(window_changed("code"), "test");
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        bus().emit(window_changed("code"), "test");
    }

    #[tokio::test]
    async fn test_async_subscribers_run_concurrently() {
        let bus = bus();
        // Both subscribers block on the same barrier. If they were run one
        // after another this would never finish.
        let barrier = Arc::new(Barrier::new(2));
        for _ in 0..2 {
            let barrier = barrier.clone();
            bus.subscribe_async(EventKind::WindowChanged, move |_| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(())
                }
                .boxed()
            });
        }

        tokio::time::timeout(
            Duration::from_secs(1),
            bus.emit_async(window_changed("code"), "test"),
        )
        .await
        .expect("Async subscribers deadlocked");
    }

    #[tokio::test]
    async fn test_emit_async_reaches_sync_subscribers_too() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            bus.subscribe_async(EventKind::WindowChanged, move |_| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push("async");
                    Ok(())
                }
                .boxed()
            });
        }
        {
            let seen = seen.clone();
            bus.subscribe(EventKind::WindowChanged, move |_| {
                seen.lock().unwrap().push("sync");
                Ok(())
            });
        }

        bus.emit_async(window_changed("code"), "test").await;
        assert_eq!(*seen.lock().unwrap(), vec!["async", "sync"]);
    }

    #[tokio::test]
    async fn test_async_failure_is_contained() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(0));
        bus.subscribe_async(EventKind::WindowChanged, |_| {
            async { Err(anyhow!("broken")) }.boxed()
        });
        {
            let seen = seen.clone();
            bus.subscribe_async(EventKind::WindowChanged, move |_| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() += 1;
                    Ok(())
                }
                .boxed()
            });
        }

        bus.emit_async(window_changed("code"), "test").await;
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
