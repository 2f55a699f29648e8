//! Aggregation of a day's sessions into the analytics snapshot.

use std::collections::HashMap;

use chrono::Timelike;
use serde::Serialize;

use crate::{
    storage::entities::{ActivitySessionEntity, Tag},
    utils::percentage::share_percentage,
};

/// Sessions with a score above this line count as productive time.
const PRODUCTIVE_SCORE_THRESHOLD: f64 = 0.6;
/// Sessions at least this long count as flow sessions.
const FLOW_SESSION_SECONDS: f64 = 1800.;
const TOP_APP_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppUsage {
    pub app: String,
    pub time: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    pub total_focused_time: i64,
    pub productivity_percentage: f64,
    pub top_apps: Vec<AppUsage>,
    /// Minutes of activity per hour-of-day bucket, 24 buckets.
    pub hourly_breakdown: Vec<i64>,
    pub distraction_count: usize,
    pub flow_sessions: usize,
}

impl Analytics {
    pub fn empty() -> Self {
        Self {
            total_focused_time: 0,
            productivity_percentage: 0.,
            top_apps: vec![],
            hourly_breakdown: vec![0; 24],
            distraction_count: 0,
            flow_sessions: 0,
        }
    }
}

/// Rolls a day's sessions up into the analytics snapshot.
pub fn aggregate(sessions: &[ActivitySessionEntity]) -> Analytics {
    if sessions.is_empty() {
        return Analytics::empty();
    }

    let total_time: f64 = sessions.iter().map(|v| v.duration_seconds).sum();
    let productive_time: f64 = sessions
        .iter()
        .filter(|v| v.productivity_score > PRODUCTIVE_SCORE_THRESHOLD)
        .map(|v| v.duration_seconds)
        .sum();

    let mut app_times = HashMap::<&str, f64>::new();
    for session in sessions {
        *app_times.entry(&session.app).or_default() += session.duration_seconds;
    }
    let mut top_apps = app_times
        .into_iter()
        .map(|(app, time)| AppUsage {
            app: app.to_string(),
            time,
            percentage: *share_percentage(time, total_time),
        })
        .collect::<Vec<_>>();
    top_apps.sort_by(|a, b| b.time.total_cmp(&a.time));
    top_apps.truncate(TOP_APP_COUNT);

    let mut hourly_breakdown = vec![0i64; 24];
    for session in sessions {
        hourly_breakdown[session.start.hour() as usize] += (session.duration_seconds / 60.) as i64;
    }

    Analytics {
        total_focused_time: total_time as i64,
        productivity_percentage: *share_percentage(productive_time, total_time),
        top_apps,
        hourly_breakdown,
        distraction_count: sessions.iter().filter(|v| v.tag == Tag::Distraction).count(),
        flow_sessions: sessions
            .iter()
            .filter(|v| v.duration_seconds > FLOW_SESSION_SECONDS)
            .count(),
    }
}

/// Duration-weighted mean score over the given sessions, 0 when there are
/// none.
pub fn weighted_score(sessions: &[ActivitySessionEntity]) -> f64 {
    let total_time: f64 = sessions.iter().map(|v| v.duration_seconds).sum();
    if total_time <= 0. {
        return 0.;
    }
    let weighted: f64 = sessions
        .iter()
        .map(|v| v.duration_seconds * v.productivity_score)
        .sum();
    weighted / total_time
}
