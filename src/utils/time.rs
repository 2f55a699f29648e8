use chrono::NaiveDate;

/// This is the standard way of converting a date to a record file name in focusd.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn format_duration_secs(seconds: i64) -> String {
    if seconds >= 3600 {
        format!("{}h{}m{}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
    } else if seconds >= 60 {
        format!("{}m{}s", seconds / 60, seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_name_is_iso_day() {
        let date = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
        assert_eq!(date_to_record_name(date), "2018-07-04");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(1500), "25:00");
        assert_eq!(format_clock(61), "01:01");
        assert_eq!(format_clock(0), "00:00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_secs(3725), "1h2m5s");
        assert_eq!(format_duration_secs(90), "1m30s");
        assert_eq!(format_duration_secs(8), "8s");
    }
}
