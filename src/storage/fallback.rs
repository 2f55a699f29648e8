use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;

use crate::utils::time::date_to_record_name;

use super::{day_file, entities::ActivitySessionEntity};

/// Last-resort activity log. When the record store refuses a write the
/// tracker appends the session here instead, one JSON line per session in a
/// per-day file, and reads it back whenever the store has nothing for a date.
pub struct FallbackLog {
    dir: PathBuf,
}

impl FallbackLog {
    pub fn new(app_dir: &Path) -> Result<Self, std::io::Error> {
        let dir = app_dir.join("fallback");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(date_to_record_name(date))
    }

    pub async fn append(&self, session: &ActivitySessionEntity) -> Result<()> {
        day_file::append_line(&self.day_path(session.start.date_naive()), session).await
    }

    /// Sessions for a date, newest first, at most `limit`.
    pub async fn read_day(
        &self,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<ActivitySessionEntity>> {
        let mut sessions: Vec<ActivitySessionEntity> =
            day_file::read_day(&self.day_path(date)).await?;
        sessions.reverse();
        sessions.truncate(limit);
        Ok(sessions)
    }
}
