//! GPS time and calendar date handling.
//!
//! GPS time counts weeks since the January 6, 1980 epoch plus seconds
//! into the week. Conversions to and from calendar dates are total and
//! lossless within floating point precision; week carries happen at the
//! 604 800 s boundary in both directions.

use constants::{SECONDS_IN_DAY, SECONDS_IN_HOUR, SECONDS_IN_MINUTE, SECONDS_IN_WEEK};

/// Calendar date and time (UTC).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DateTime {
    pub y: i32,
    pub m: i32,
    pub d: i32,
    pub hh: i32,
    pub mm: i32,
    pub sec: f64,
}

/// GPS time: week number since the GPS epoch and seconds of week.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GpsTime {
    pub week: i32,
    pub sec: f64,
}

impl GpsTime {
    /// Difference `self - other` in seconds, spanning week boundaries.
    pub fn diff_secs(&self, other: &Self) -> f64 {
        (self.sec - other.sec) + f64::from(self.week - other.week) * SECONDS_IN_WEEK
    }

    /// Returns `self + dt`, rounded to the nearest millisecond to keep
    /// repeated 0.1 s steps from accumulating representation error.
    /// Week number carries across the 604 800 s boundary either way.
    pub fn add_secs(&self, dt: f64) -> Self {
        let mut g = Self {
            week: self.week,
            sec: self.sec + dt,
        };
        g.sec = (g.sec * 1000.0).round() / 1000.0;

        while g.sec >= SECONDS_IN_WEEK {
            g.sec -= SECONDS_IN_WEEK;
            g.week += 1;
        }
        while g.sec < 0.0 {
            g.sec += SECONDS_IN_WEEK;
            g.week -= 1;
        }
        g
    }
}

impl From<&DateTime> for GpsTime {
    fn from(t: &DateTime) -> Self {
        const DOY: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

        let ye = t.y - 1980;

        // Leap days since Jan 5/Jan 6, 1980.
        let mut lpdays = ye / 4 + 1;
        if ye % 4 == 0 && t.m <= 2 {
            lpdays -= 1;
        }

        // Days elapsed since Jan 5/Jan 6, 1980.
        let de = ye * 365 + DOY[(t.m - 1) as usize] + t.d + lpdays - 6;

        Self {
            week: de / 7,
            sec: f64::from(de % 7) * SECONDS_IN_DAY
                + f64::from(t.hh) * SECONDS_IN_HOUR
                + f64::from(t.mm) * SECONDS_IN_MINUTE
                + t.sec,
        }
    }
}

impl From<&GpsTime> for DateTime {
    fn from(g: &GpsTime) -> Self {
        // Julian day number to calendar date.
        let c = (7 * g.week + (g.sec / 86400.0).floor() as i32 + 2_444_245) + 1537;
        let d = ((f64::from(c) - 122.1) / 365.25) as i32;
        let e = 365 * d + d / 4;
        let f = ((c - e) as f64 / 30.6001) as i32;

        let day = c - e - (30.6001 * f64::from(f)) as i32;
        let m = f - 1 - 12 * (f / 14);
        let y = d - 4715 - ((7 + m) / 10);

        Self {
            y,
            m,
            d: day,
            hh: ((g.sec / 3600.0) as i32) % 24,
            mm: ((g.sec / 60.0) as i32) % 60,
            sec: g.sec - 60.0 * (g.sec / 60.0).floor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn gps_epoch_is_week_zero() {
        let t = DateTime {
            y: 1980,
            m: 1,
            d: 6,
            hh: 0,
            mm: 0,
            sec: 0.0,
        };
        let g = GpsTime::from(&t);
        assert_eq!(g.week, 0);
        assert!(g.sec.abs() < 1e-9);
    }

    #[test]
    fn known_date_maps_to_known_week() {
        // Saturday, January 1, 2022.
        let t = DateTime {
            y: 2022,
            m: 1,
            d: 1,
            hh: 0,
            mm: 0,
            sec: 0.0,
        };
        let g = GpsTime::from(&t);
        assert_eq!(g.week, 2190);
        assert!((g.sec - 518_400.0).abs() < 1e-9);
    }

    #[test_case(0, 0.0; "epoch")]
    #[test_case(1024, 302_400.0; "first rollover midweek")]
    #[test_case(2048, 604_799.0; "second rollover week end")]
    #[test_case(2190, 518_400.0; "recent week")]
    #[test_case(4095, 12_345.678; "far future")]
    fn gps_date_round_trip(week: i32, sec: f64) {
        let g = GpsTime { week, sec };
        let t = DateTime::from(&g);
        let back = GpsTime::from(&t);
        assert_eq!(back.week, g.week);
        assert!((back.sec - g.sec).abs() < 1e-3, "sec {} -> {}", g.sec, back.sec);
    }

    #[test]
    fn add_secs_carries_week_forward() {
        let g = GpsTime {
            week: 2190,
            sec: SECONDS_IN_WEEK - 0.05,
        };
        let g1 = g.add_secs(0.1);
        assert_eq!(g1.week, 2191);
        assert!((g1.sec - 0.05).abs() < 1e-9);
    }

    #[test]
    fn add_secs_carries_week_backward() {
        let g = GpsTime {
            week: 2191,
            sec: 0.05,
        };
        let g1 = g.add_secs(-0.1);
        assert_eq!(g1.week, 2190);
        assert!((g1.sec - (SECONDS_IN_WEEK - 0.05)).abs() < 1e-9);
    }

    #[test]
    fn diff_spans_week_boundaries() {
        let a = GpsTime {
            week: 2191,
            sec: 10.0,
        };
        let b = GpsTime {
            week: 2190,
            sec: SECONDS_IN_WEEK - 10.0,
        };
        assert!((a.diff_secs(&b) - 20.0).abs() < 1e-9);
        assert!((b.diff_secs(&a) + 20.0).abs() < 1e-9);
    }

    #[test]
    fn add_secs_rounds_to_milliseconds() {
        let mut g = GpsTime {
            week: 2190,
            sec: 0.0,
        };
        for _ in 0..1000 {
            g = g.add_secs(0.1);
        }
        assert!((g.sec - 100.0).abs() < 1e-9);
    }
}
