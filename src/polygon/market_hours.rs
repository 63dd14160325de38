use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};

const OPEN_MINUTE: u32 = 9 * 60 + 30;
const CLOSE_MINUTE: u32 = 16 * 60;

/// `2024-03-01` -> `20240301`.
pub fn format_polygon_date(date: &str) -> String {
    date.replace('-', "")
}

/// Regular session check on a wall-clock time: weekdays, 09:30 through 16:00
/// inclusive. Holidays and time zones are not considered.
pub fn is_market_open_at(at: NaiveDateTime) -> bool {
    if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minute = at.hour() * 60 + at.minute();
    (OPEN_MINUTE..=CLOSE_MINUTE).contains(&minute)
}

pub fn is_market_open() -> bool {
    is_market_open_at(Local::now().naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn compact_date() {
        assert_eq!(format_polygon_date("2024-03-01"), "20240301");
        assert_eq!(format_polygon_date("20240301"), "20240301");
    }

    #[test]
    fn session_bounds_are_inclusive() {
        // 2024-03-01 is a Friday.
        assert!(!is_market_open_at(at(2024, 3, 1, 9, 29)));
        assert!(is_market_open_at(at(2024, 3, 1, 9, 30)));
        assert!(is_market_open_at(at(2024, 3, 1, 12, 0)));
        assert!(is_market_open_at(at(2024, 3, 1, 16, 0)));
        assert!(!is_market_open_at(at(2024, 3, 1, 16, 1)));
    }

    #[test]
    fn weekend_is_closed() {
        assert!(!is_market_open_at(at(2024, 3, 2, 12, 0)));
        assert!(!is_market_open_at(at(2024, 3, 3, 12, 0)));
        assert!(is_market_open_at(at(2024, 3, 4, 12, 0)));
    }
}
