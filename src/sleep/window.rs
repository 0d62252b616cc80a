use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

/// Whether `now` lies in the daily window from `start` to `end`
///
/// Windows crossing midnight (end before start) are anchored on the side of
/// midnight `now` is on: before the start, the window began the previous day;
/// otherwise it ends the next day. The start is inclusive, the end exclusive.
pub fn is_within_auto_window(start: NaiveTime, end: NaiveTime, now: NaiveDateTime) -> bool {
    let today = now.date();
    let mut start_at = today.and_time(start);
    let mut end_at = today.and_time(end);

    if end_at < start_at {
        if now < start_at {
            start_at -= TimeDelta::days(1);
        } else {
            end_at += TimeDelta::days(1);
        }
    }

    now >= start_at && now < end_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_time(time(hour, minute))
    }

    #[test]
    fn same_day_window() {
        let (start, end) = (time(13, 0), time(15, 30));
        assert!(!is_within_auto_window(start, end, at(12, 59)));
        assert!(is_within_auto_window(start, end, at(13, 0)));
        assert!(is_within_auto_window(start, end, at(15, 29)));
        assert!(!is_within_auto_window(start, end, at(15, 30)));
    }

    #[test]
    fn window_across_midnight() {
        let (start, end) = (time(22, 0), time(6, 0));
        assert!(is_within_auto_window(start, end, at(23, 15)));
        assert!(is_within_auto_window(start, end, at(0, 30)));
        assert!(is_within_auto_window(start, end, at(5, 59)));
        assert!(!is_within_auto_window(start, end, at(6, 0)));
        assert!(!is_within_auto_window(start, end, at(12, 0)));
        assert!(!is_within_auto_window(start, end, at(21, 59)));
    }

    #[test]
    fn empty_window_never_matches() {
        assert!(!is_within_auto_window(time(8, 0), time(8, 0), at(8, 0)));
    }
}
