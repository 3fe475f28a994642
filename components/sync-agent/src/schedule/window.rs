// External crates
use chrono::NaiveTime;
use std::fmt;

/// Daily time window in which sync cycles may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWindow {
    /// No restriction.
    Always,
    /// `start <= now < end`, wrapping past midnight when `start > end`.
    Between {
        /// Inclusive start.
        start: NaiveTime,
        /// Exclusive end.
        end: NaiveTime,
    },
}

impl SyncWindow {
    /// Parse `HH:MM` bounds. Equal bounds mean [`SyncWindow::Always`]; an
    /// unparsable bound is logged and also yields `Always`.
    pub fn parse(start: &str, end: &str) -> Self {
        let parsed = (
            NaiveTime::parse_from_str(start.trim(), "%H:%M"),
            NaiveTime::parse_from_str(end.trim(), "%H:%M"),
        );

        match parsed {
            (Ok(start), Ok(end)) if start == end => SyncWindow::Always,
            (Ok(start), Ok(end)) => SyncWindow::Between { start, end },
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(
                    allowed_start_time = start,
                    allowed_end_time = end,
                    error = %e,
                    "Invalid sync window, allowing sync at any time"
                );
                SyncWindow::Always
            }
        }
    }

    /// Whether a cycle may start at `now`.
    #[must_use]
    pub fn contains(&self, now: NaiveTime) -> bool {
        match *self {
            SyncWindow::Always => true,
            SyncWindow::Between { start, end } if start < end => start <= now && now < end,
            SyncWindow::Between { start, end } => now >= start || now < end,
        }
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncWindow::Always => f.write_str("always"),
            SyncWindow::Between { start, end } => {
                write!(f, "{}-{}", start.format("%H:%M"), end.format("%H:%M"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn equal_bounds_always_allow() {
        let window = SyncWindow::parse("00:00", "00:00");
        assert_eq!(window, SyncWindow::Always);
        assert!(window.contains(at(13, 37)));
    }

    #[test]
    fn daytime_window_is_half_open() {
        let window = SyncWindow::parse("09:00", "17:00");
        assert!(!window.contains(at(8, 59)));
        assert!(window.contains(at(9, 0)));
        assert!(window.contains(at(16, 59)));
        assert!(!window.contains(at(17, 0)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let window = SyncWindow::parse("22:00", "09:00");
        assert!(window.contains(at(22, 0)));
        assert!(window.contains(at(23, 59)));
        assert!(window.contains(at(0, 0)));
        assert!(window.contains(at(8, 59)));
        assert!(!window.contains(at(9, 0)));
        assert!(!window.contains(at(12, 0)));
        assert!(!window.contains(at(21, 59)));
    }

    #[test]
    fn invalid_bounds_fall_back_to_always() {
        assert_eq!(SyncWindow::parse("25:00", "06:00"), SyncWindow::Always);
        assert_eq!(SyncWindow::parse("22:00", "late"), SyncWindow::Always);
    }

    #[test]
    fn display_shows_bounds() {
        assert_eq!(SyncWindow::parse("22:00", "06:30").to_string(), "22:00-06:30");
        assert_eq!(SyncWindow::Always.to_string(), "always");
    }
}
