//! Terminal rendering for status, logs and analytics.

use ansi_term::Colour;
use chrono::{Local, NaiveDate};

use crate::{
    broadcast::OutboundMessage,
    pomodoro::PomodoroStatus,
    storage::entities::{ActivitySessionEntity, Phase, PomodoroSessionEntity, Tag},
    tracker::{analytics::Analytics, TrackerStatus},
    utils::time::{format_clock, format_duration_secs},
};

fn score_colour(score: f64) -> Colour {
    if score > 0.6 {
        Colour::Green
    } else if score >= 0.3 {
        Colour::Yellow
    } else {
        Colour::Red
    }
}

fn tag_label(tag: Tag) -> &'static str {
    match tag {
        Tag::Development => "Development",
        Tag::Research => "Research",
        Tag::Communication => "Communication",
        Tag::Distraction => "Distraction",
        Tag::General => "General",
        Tag::Untagged => "Untagged",
    }
}

pub fn print_status(focus: &TrackerStatus, pomodoro: &PomodoroStatus) {
    let monitoring = if focus.is_monitoring {
        Colour::Green.paint("monitoring")
    } else {
        Colour::Red.paint("idle")
    };
    println!("{} [{monitoring}]", Colour::White.bold().paint("Focus"));
    println!(
        "  window:  {} - {}",
        focus.active_app.as_deref().unwrap_or("-"),
        focus.window_title.as_deref().unwrap_or("-"),
    );
    println!("  elapsed: {}", format_duration_secs(focus.elapsed_seconds));
    println!(
        "  today:   {}",
        score_colour(focus.productivity_score)
            .paint(format!("{:.0}% productive", focus.productivity_score * 100.))
    );

    let running = if pomodoro.is_running {
        Colour::Green.paint("running")
    } else {
        Colour::Red.paint("stopped")
    };
    println!("{} [{running}]", Colour::White.bold().paint("Pomodoro"));
    println!(
        "  {} {} (cycle {})",
        pomodoro.phase,
        format_clock(pomodoro.seconds_left),
        pomodoro.cycle_count,
    );
}

/// One-line rendering of a pushed update, for `status --follow`.
pub fn print_event(message: &OutboundMessage) {
    match message {
        OutboundMessage::WindowChanged { data, .. } => {
            println!(
                "window changed: {} - {}",
                data.active_app.as_deref().unwrap_or("-"),
                data.window_title.as_deref().unwrap_or("-"),
            );
        }
        OutboundMessage::ActivityLogged { data, .. } => {
            println!(
                "logged: {} for {} ({})",
                data.app,
                format_duration_secs(data.duration_seconds as i64),
                tag_label(data.tag),
            );
        }
        OutboundMessage::PomodoroUpdate { data, .. } => {
            println!(
                "pomodoro: {} {} (cycle {})",
                data.phase,
                format_clock(data.seconds_left),
                data.cycle_count,
            );
        }
        OutboundMessage::FocusUpdate { data, .. } => {
            println!(
                "focus: {} ({:.0}% productive today)",
                data.active_app.as_deref().unwrap_or("-"),
                data.productivity_score * 100.,
            );
        }
        _ => {}
    }
}

pub fn print_logs(date: NaiveDate, sessions: &[ActivitySessionEntity]) {
    if sessions.is_empty() {
        println!("No sessions recorded for {date}");
        return;
    }

    println!("{}", Colour::White.bold().paint(format!("Sessions for {date}")));
    for session in sessions {
        let score = session.productivity_score;
        println!(
            "{}\t{}\t{}\t{}\t{}",
            session.start.with_timezone(&Local).format("%H:%M:%S"),
            format_duration_secs(session.duration_seconds as i64),
            score_colour(score).paint(format!("{score:.2}")),
            tag_label(session.tag),
            session.app,
        );
    }
}

pub fn print_analytics(date: NaiveDate, analytics: &Analytics) {
    println!("{}", Colour::White.bold().paint(format!("Analytics for {date}")));
    println!(
        "  focused time:   {}",
        format_duration_secs(analytics.total_focused_time)
    );
    println!(
        "  productive:     {}",
        score_colour(analytics.productivity_percentage / 100.)
            .paint(format!("{:.1}%", analytics.productivity_percentage))
    );
    println!("  distractions:   {}", analytics.distraction_count);
    println!("  flow sessions:  {}", analytics.flow_sessions);

    if !analytics.top_apps.is_empty() {
        println!("  top apps:");
        for usage in &analytics.top_apps {
            println!(
                "    {}%\t{}\t{}",
                usage.percentage as i32,
                format_duration_secs(usage.time as i64),
                usage.app,
            );
        }
    }

    let busy_hours = analytics
        .hourly_breakdown
        .iter()
        .enumerate()
        .filter(|(_, minutes)| **minutes > 0)
        .map(|(hour, minutes)| format!("{hour:02}h:{minutes}m"))
        .collect::<Vec<_>>();
    if !busy_hours.is_empty() {
        println!("  by hour (utc):  {}", busy_hours.join(" "));
    }
}

pub fn print_pomodoro_summary(sessions: &[PomodoroSessionEntity]) {
    if sessions.is_empty() {
        return;
    }
    let total = sessions.iter().filter(|v| v.phase == Phase::Focus).count();
    let completed = sessions
        .iter()
        .filter(|v| v.phase == Phase::Focus && v.completed)
        .count();
    let skipped = sessions.iter().filter(|v| v.skipped).count();
    println!("  pomodoros:      {completed}/{total} focus phases completed, {skipped} skipped");
}
