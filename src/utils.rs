use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    fn app_name(self) -> &'static str {
        match self {
            Profile::Dev => "planboard-dev",
            Profile::Prod => "planboard",
        }
    }
}

/// Get the configuration directory path
/// If profile is Dev, uses "planboard-dev" instead of "planboard"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "planboard", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "planboard", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a date string in ISO 8601 format (YYYY-MM-DD)
pub fn parse_date(date_str: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
}

/// Parse a timestamp in any of the shapes found in stored and remote data:
/// RFC 3339 (`2024-01-01T09:00:00.000Z`), naive `YYYY-MM-DDTHH:MM[:SS]` or
/// `YYYY-MM-DD HH:MM[:SS]` (taken as UTC), or a bare date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    parse_timestamp_in(raw, &Utc)
}

/// Like [`parse_timestamp`], but naive forms are wall-clock time in `tz`
pub fn parse_timestamp_in<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(local_to_utc(naive, tz));
        }
    }
    parse_date(raw)
        .ok()
        .map(|d| local_to_utc(d.and_time(NaiveTime::MIN), tz))
}

/// Wall-clock `naive` in `tz` as a UTC instant. Inside a DST gap the
/// wall-clock value is taken as UTC.
pub fn local_to_utc<Tz: TimeZone>(naive: NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// First `max_chars` characters of `text`, with `...` appended when cut
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

/// Split a comma-separated tag list into trimmed, non-empty, lowercase tags
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_in_all_supported_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T09:00:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T09:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 09:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("tomorrow"), None);
    }

    #[test]
    fn naive_timestamps_read_in_the_given_zone() {
        let seoul = chrono::FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(
            parse_timestamp_in("2024-02-01 05:00", &seoul),
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 20, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp_in("2024-02-01", &seoul),
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 15, 0, 0).unwrap())
        );
        // An explicit offset wins over the zone
        assert_eq!(
            parse_timestamp_in("2024-02-01T05:00:00Z", &seoul),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 5, 0, 0).unwrap())
        );
    }

    #[test]
    fn excerpt_cuts_on_characters() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("회의록 정리하기", 3), "회의록...");
    }

    #[test]
    fn tags_are_normalized() {
        assert_eq!(parse_tags(" Work, ,home "), vec!["work", "home"]);
    }

    #[test]
    fn plain_paths_are_untouched() {
        assert_eq!(expand_path("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }
}
