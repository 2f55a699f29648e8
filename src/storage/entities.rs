use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse category attached to a closed activity session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Development,
    Research,
    Communication,
    Distraction,
    General,
    Untagged,
}

/// One contiguous stretch of a single foreground window, closed either by a
/// window change or by monitoring stop. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySessionEntity {
    pub app: Arc<str>,
    pub title: Arc<str>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub end: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tag: Tag,
    pub productivity_score: f64,
}

/// Phase of the pomodoro cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Focus => write!(f, "Focus"),
            Phase::ShortBreak => write!(f, "Short Break"),
            Phase::LongBreak => write!(f, "Long Break"),
        }
    }
}

pub type PomodoroSessionId = u64;

/// What the timer knows about a session when the phase starts. The store
/// assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPomodoroSession {
    pub phase: Phase,
    pub planned_duration: i64,
    pub cycle_number: u32,
    pub start: DateTime<Utc>,
}

/// Bookkeeping record for one pomodoro phase run. Created when the phase
/// starts, patched on pause/skip/reset, finalized on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PomodoroSessionEntity {
    pub id: PomodoroSessionId,
    pub phase: Phase,
    /// Seconds the phase was supposed to run.
    pub planned_duration: i64,
    /// Seconds the phase actually ran so far.
    pub actual_duration: i64,
    pub completed: bool,
    pub skipped: bool,
    pub cycle_number: u32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub end: Option<DateTime<Utc>>,
}

/// Partial update applied to an open pomodoro session record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PomodoroPatch {
    pub actual_duration: Option<i64>,
    pub completed: Option<bool>,
    pub skipped: Option<bool>,
    pub end: Option<DateTime<Utc>>,
}

impl PomodoroSessionEntity {
    pub fn apply(&mut self, patch: &PomodoroPatch) {
        if let Some(v) = patch.actual_duration {
            self.actual_duration = v;
        }
        if let Some(v) = patch.completed {
            self.completed = v;
        }
        if let Some(v) = patch.skipped {
            self.skipped = v;
        }
        if let Some(v) = patch.end {
            self.end = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_activity_session_roundtrip() {
        let session = ActivitySessionEntity {
            app: "code".into(),
            title: "main.rs - focusd".into(),
            start: Utc.with_ymd_and_hms(2018, 7, 4, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2018, 7, 4, 10, 5, 0).unwrap(),
            duration_seconds: 300.,
            tag: Tag::Development,
            productivity_score: 0.9,
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: ActivitySessionEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let mut session = PomodoroSessionEntity {
            id: 1,
            phase: Phase::Focus,
            planned_duration: 1500,
            actual_duration: 0,
            completed: false,
            skipped: false,
            cycle_number: 1,
            start: Utc.with_ymd_and_hms(2018, 7, 4, 10, 0, 0).unwrap(),
            end: None,
        };
        session.apply(&PomodoroPatch {
            actual_duration: Some(60),
            ..Default::default()
        });
        assert_eq!(session.actual_duration, 60);
        assert!(!session.completed);
        assert!(session.end.is_none());
    }
}
