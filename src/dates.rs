use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone};

pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), DATE_KEY_FORMAT).ok()
}

pub fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    date - Duration::days(days)
}

/// The first instant of the calendar day after `now`, in `now`'s zone.
///
/// Zones that skip midnight (DST starting at 00:00) yield the first instant that
/// exists on that day.
pub fn next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let tomorrow = now.date_naive() + Duration::days(1);
    let Some(mut candidate) = tomorrow.and_hms_opt(0, 0, 0) else {
        return now.clone() + Duration::days(1);
    };
    // A DST gap is at most a few hours; walk forward in 15 minute steps.
    for _ in 0..16 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(at) => return at,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => candidate += Duration::minutes(15),
        }
    }
    now.clone() + Duration::days(1)
}
