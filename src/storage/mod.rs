//! Persistence for closed activity sessions and pomodoro session records.
//! The basic idea is:
//!  - Everything lives in per-UTC-day JSON-lines files.
//!  - Activity sessions are immutable, so day files are append-only.
//!  - Pomodoro updates append journal lines that are collapsed by id on read.

pub mod day_file;
pub mod entities;
pub mod fallback;
pub mod store;
