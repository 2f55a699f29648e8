use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::debug;

use crate::utils::time::date_to_record_name;

use super::{
    day_file,
    entities::{
        ActivitySessionEntity, NewPomodoroSession, PomodoroPatch, PomodoroSessionEntity,
        PomodoroSessionId,
    },
};

/// Interface to the persisted record store. The tracker and the timer only
/// ever talk to this trait; failures are theirs to survive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn create_activity_log(&self, session: ActivitySessionEntity) -> Result<()>;

    /// Sessions recorded for a date, newest first, at most `limit`.
    async fn get_activity_logs(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<ActivitySessionEntity>>;

    async fn create_pomodoro_session(
        &self,
        session: NewPomodoroSession,
    ) -> Result<PomodoroSessionId>;

    async fn update_pomodoro_session(
        &self,
        id: PomodoroSessionId,
        patch: PomodoroPatch,
    ) -> Result<()>;
}

/// The main realization of [RecordStore]: per-day JSON-lines files under the
/// application directory. Pomodoro updates are appended as new journal lines
/// and collapsed by id on read, so nothing is ever rewritten in place.
pub struct FileRecordStore {
    activity_dir: PathBuf,
    pomodoro_dir: PathBuf,
    next_id: AtomicU64,
    open_sessions: Mutex<HashMap<PomodoroSessionId, PomodoroSessionEntity>>,
}

impl FileRecordStore {
    pub fn new(app_dir: &Path) -> Result<Self, std::io::Error> {
        let activity_dir = app_dir.join("records");
        let pomodoro_dir = app_dir.join("pomodoro");
        std::fs::create_dir_all(&activity_dir)?;
        std::fs::create_dir_all(&pomodoro_dir)?;

        let next_id = AtomicU64::new(max_known_session_id(&pomodoro_dir) + 1);

        Ok(Self {
            activity_dir,
            pomodoro_dir,
            next_id,
            open_sessions: Mutex::new(HashMap::new()),
        })
    }

    fn activity_path(&self, date: NaiveDate) -> PathBuf {
        self.activity_dir.join(date_to_record_name(date))
    }

    fn pomodoro_path(&self, date: NaiveDate) -> PathBuf {
        self.pomodoro_dir.join(date_to_record_name(date))
    }

    /// Journal entries for a date collapsed to the latest state per session.
    pub async fn get_pomodoro_sessions(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<PomodoroSessionEntity>> {
        let entries: Vec<PomodoroSessionEntity> =
            day_file::read_day(&self.pomodoro_path(date)).await?;
        let mut latest = HashMap::new();
        for entry in entries {
            latest.insert(entry.id, entry);
        }
        let mut sessions = latest.into_values().collect::<Vec<_>>();
        sessions.sort_by_key(|v| v.id);
        Ok(sessions)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn create_activity_log(&self, session: ActivitySessionEntity) -> Result<()> {
        let path = self.activity_path(session.start.date_naive());
        day_file::append_line(&path, &session).await
    }

    async fn get_activity_logs(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<ActivitySessionEntity>> {
        let mut sessions: Vec<ActivitySessionEntity> =
            day_file::read_day(&self.activity_path(date)).await?;
        sessions.reverse();
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn create_pomodoro_session(
        &self,
        session: NewPomodoroSession,
    ) -> Result<PomodoroSessionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entity = PomodoroSessionEntity {
            id,
            phase: session.phase,
            planned_duration: session.planned_duration,
            actual_duration: 0,
            completed: false,
            skipped: false,
            cycle_number: session.cycle_number,
            start: session.start,
            end: None,
        };

        day_file::append_line(&self.pomodoro_path(entity.start.date_naive()), &entity).await?;
        self.open_sessions.lock().await.insert(id, entity);
        debug!("Created pomodoro session {id}");
        Ok(id)
    }

    async fn update_pomodoro_session(
        &self,
        id: PomodoroSessionId,
        patch: PomodoroPatch,
    ) -> Result<()> {
        let mut open = self.open_sessions.lock().await;
        let session = open
            .get_mut(&id)
            .ok_or_else(|| anyhow!("No open pomodoro session with id {id}"))?;
        session.apply(&patch);
        let entity = session.clone();
        if entity.end.is_some() {
            open.remove(&id);
        }
        drop(open);

        day_file::append_line(&self.pomodoro_path(entity.start.date_naive()), &entity).await
    }
}

/// Highest session id present in the journal, so ids stay unique across
/// daemon restarts.
fn max_known_session_id(pomodoro_dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(pomodoro_dir) else {
        return 0;
    };
    let mut max_id = 0;
    for entry in entries.flatten() {
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for line in content.lines() {
            if let Ok(session) = serde_json::from_str::<PomodoroSessionEntity>(line) {
                max_id = max_id.max(session.id);
            }
        }
    }
    max_id
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use crate::storage::entities::{Phase, Tag};

    use super::*;

    fn activity(app: &str, hour: u32) -> ActivitySessionEntity {
        ActivitySessionEntity {
            app: app.into(),
            title: "".into(),
            start: Utc.with_ymd_and_hms(2018, 7, 4, hour, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2018, 7, 4, hour, 30, 0).unwrap(),
            duration_seconds: 1800.,
            tag: Tag::General,
            productivity_score: 0.5,
        }
    }

    #[tokio::test]
    async fn test_activity_logs_newest_first_with_limit() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FileRecordStore::new(dir.path())?;
        let date = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();

        store.create_activity_log(activity("first", 9)).await?;
        store.create_activity_log(activity("second", 10)).await?;
        store.create_activity_log(activity("third", 11)).await?;

        let logs = store.get_activity_logs(date, 2).await?;
        assert_eq!(logs.len(), 2);
        assert_eq!(&*logs[0].app, "third");
        assert_eq!(&*logs[1].app, "second");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_date_is_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FileRecordStore::new(dir.path())?;
        let logs = store
            .get_activity_logs(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 100)
            .await?;
        assert!(logs.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_pomodoro_journal_collapses_to_latest() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FileRecordStore::new(dir.path())?;
        let start = Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap();

        let id = store
            .create_pomodoro_session(NewPomodoroSession {
                phase: Phase::Focus,
                planned_duration: 1500,
                cycle_number: 1,
                start,
            })
            .await?;

        store
            .update_pomodoro_session(id, PomodoroPatch {
                actual_duration: Some(600),
                ..Default::default()
            })
            .await?;
        store
            .update_pomodoro_session(id, PomodoroPatch {
                actual_duration: Some(1500),
                completed: Some(true),
                end: Some(start + chrono::Duration::seconds(1500)),
                ..Default::default()
            })
            .await?;

        let sessions = store.get_pomodoro_sessions(start.date_naive()).await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].actual_duration, 1500);
        assert!(sessions[0].completed);
        assert!(sessions[0].end.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_after_finalize_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FileRecordStore::new(dir.path())?;
        let start = Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap();

        let id = store
            .create_pomodoro_session(NewPomodoroSession {
                phase: Phase::Focus,
                planned_duration: 1500,
                cycle_number: 1,
                start,
            })
            .await?;
        store
            .update_pomodoro_session(id, PomodoroPatch {
                completed: Some(true),
                end: Some(start),
                ..Default::default()
            })
            .await?;

        let result = store
            .update_pomodoro_session(id, PomodoroPatch::default())
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_ids_survive_restart() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let start = Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap();

        let first_id = {
            let store = FileRecordStore::new(dir.path())?;
            store
                .create_pomodoro_session(NewPomodoroSession {
                    phase: Phase::Focus,
                    planned_duration: 1500,
                    cycle_number: 1,
                    start,
                })
                .await?
        };

        let store = FileRecordStore::new(dir.path())?;
        let second_id = store
            .create_pomodoro_session(NewPomodoroSession {
                phase: Phase::ShortBreak,
                planned_duration: 300,
                cycle_number: 1,
                start,
            })
            .await?;

        assert!(second_id > first_id);
        Ok(())
    }
}
