//! Productivity scoring and tagging of closed sessions. Scores are always
//! clamped to [0, 1], whatever the inputs.

use crate::storage::entities::Tag;

/// Base score per known application. Unknown applications sit in the middle.
const BASE_SCORES: &[(&str, f64)] = &[
    ("code", 0.9),
    ("cursor", 0.9),
    ("notepad++", 0.8),
    ("cmd", 0.7),
    ("powershell", 0.7),
    ("terminal", 0.7),
    // Browsers depend entirely on what's in them; the title keywords decide.
    ("firefox", 0.3),
    ("chrome", 0.3),
    ("edge", 0.3),
];

const DEFAULT_BASE_SCORE: f64 = 0.5;

/// Title keywords hinting at coding or learning content.
const PRODUCTIVE_KEYWORDS: &[&str] = &[
    "python",
    "javascript",
    "rust",
    "react",
    "github",
    "stackoverflow",
    "documentation",
    "tutorial",
];

/// Title keywords hinting at known time sinks.
const DISTRACTION_KEYWORDS: &[&str] = &[
    "youtube", "facebook", "twitter", "reddit", "tiktok", "instagram", "netflix", "gaming",
];

const DEV_APP_KEYWORDS: &[&str] = &["code", "cursor", "git", "terminal", "cmd"];
const RESEARCH_TITLE_KEYWORDS: &[&str] =
    &["documentation", "tutorial", "learning", "course", "stackoverflow"];
const COMMUNICATION_APP_KEYWORDS: &[&str] = &["slack", "teams", "discord", "zoom"];
const DISTRACTION_TITLE_KEYWORDS: &[&str] = &["youtube", "netflix", "gaming", "social", "reddit"];

fn normalized_app(app: &str) -> String {
    app.to_lowercase().trim_end_matches(".exe").to_string()
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}

/// Productivity score of one session in [0, 1].
///
/// Base score per application, adjusted by title keywords (+0.3 capped at
/// 1.0 for learning/coding content, −0.4 floored at 0.0 for known
/// distractions), then multiplied by a small bonus for long focused
/// stretches.
pub fn score(app: &str, title: &str, duration_seconds: f64) -> f64 {
    if app.is_empty() || duration_seconds < 1. {
        return 0.;
    }

    let mut base = BASE_SCORES
        .iter()
        .find(|(name, _)| *name == normalized_app(app))
        .map(|(_, score)| *score)
        .unwrap_or(DEFAULT_BASE_SCORE);

    let title_lower = title.to_lowercase();
    if contains_any(&title_lower, PRODUCTIVE_KEYWORDS) {
        base = (base + 0.3).min(1.0);
    } else if contains_any(&title_lower, DISTRACTION_KEYWORDS) {
        base = (base - 0.4).max(0.0);
    }

    // Max 10% bonus, reached after an hour of unbroken focus.
    let duration_factor = (1.0 + duration_seconds / 3600. * 0.1).min(1.1);

    (base * duration_factor).clamp(0.0, 1.0)
}

/// Coarse category of a session. Priority ordered, first match wins:
/// Development > Research > Communication > Distraction > General. Sessions
/// without an application name stay untagged.
pub fn classify(app: &str, title: &str) -> Tag {
    if app.is_empty() {
        return Tag::Untagged;
    }

    let app_lower = app.to_lowercase();
    let title_lower = title.to_lowercase();

    if contains_any(&app_lower, DEV_APP_KEYWORDS) {
        Tag::Development
    } else if contains_any(&title_lower, RESEARCH_TITLE_KEYWORDS) {
        Tag::Research
    } else if contains_any(&app_lower, COMMUNICATION_APP_KEYWORDS) {
        Tag::Communication
    } else if contains_any(&title_lower, DISTRACTION_TITLE_KEYWORDS) {
        Tag::Distraction
    } else {
        Tag::General
    }
}
