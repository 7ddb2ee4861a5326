use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

/// Maps calendar timestamps to solver time.
///
/// Solver time is measured in seconds since the start of the run, so the
/// first instant is always `0.0`.
///
/// # Examples
///
/// ```
/// use basin_sim::sim::clock::Clock;
/// use chrono::NaiveDate;
///
/// let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let end = NaiveDate::from_ymd_opt(2020, 1, 3).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let clock = Clock::new(start, end);
///
/// assert_eq!(clock.end_seconds(), 172_800.0);
/// assert_eq!(clock.datetime(86_400.0).to_string(), "2020-01-02 00:00:00");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    /// Calendar time of solver time zero
    start: NaiveDateTime,
    /// Calendar time at which the run stops
    end: NaiveDateTime,
}

impl Clock {
    /// Creates a clock spanning `[start, end]`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Seconds between the start of the run and `at` (negative before it).
    pub fn seconds(&self, at: NaiveDateTime) -> f64 {
        (at - self.start).num_milliseconds() as f64 / 1_000.0
    }

    /// Calendar time at solver time `t`, rounded to the millisecond.
    pub fn datetime(&self, t: f64) -> NaiveDateTime {
        self.start + TimeDelta::milliseconds((t * 1_000.0).round() as i64)
    }

    /// Solver time of the end of the run.
    pub fn end_seconds(&self) -> f64 {
        self.seconds(self.end)
    }

    /// Zero-based calendar month (January = 0) at solver time `t`.
    pub fn month_index(&self, t: f64) -> usize {
        self.datetime(t).month0() as usize
    }

    /// Solver times of the month starts strictly inside the run.
    ///
    /// The open-water factor jumps at these instants, so the engine stops
    /// the integrator on them.
    pub fn month_starts(&self) -> Vec<f64> {
        let end = self.end_seconds();
        let mut starts = Vec::new();
        let mut first = NaiveDate::from_ymd_opt(self.start.year(), self.start.month(), 1);
        while let Some(next) = first.and_then(|d| d.checked_add_months(Months::new(1))) {
            let t = self.seconds(next.and_time(NaiveTime::MIN));
            if t >= end {
                break;
            }
            starts.push(t);
            first = Some(next);
        }
        starts
    }

    /// Start of the run.
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// End of the run.
    pub fn end(&self) -> NaiveDateTime {
        self.end
    }
}
