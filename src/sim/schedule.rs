/// Instants closer than this (seconds) are treated as the same instant.
pub const TIME_EPS: f64 = 1e-6;

/// Ordered set of instants at which the engine must stop and act.
///
/// Used for forcing updates and for forced output times. The schedule is a
/// cursor over a sorted list: [`Schedule::tick`] hands out each instant
/// exactly once, in increasing order.
///
/// # Examples
///
/// ```
/// use basin_sim::sim::schedule::Schedule;
///
/// let mut schedule = Schedule::forcing_updates(10.0, 30.0, &[15.0, 40.0]);
/// assert_eq!(schedule.times(), &[0.0, 10.0, 15.0, 20.0]);
/// assert_eq!(schedule.tick(), Some(0.0));
/// assert_eq!(schedule.peek(), Some(10.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    times: Vec<f64>,
    next: usize,
}

impl Schedule {
    /// Builds a schedule from arbitrary instants (sorted and de-duplicated).
    pub fn from_times(mut times: Vec<f64>) -> Self {
        times.retain(|t| t.is_finite());
        times.sort_by(f64::total_cmp);
        times.dedup_by(|b, a| (*b - *a).abs() < TIME_EPS);
        Self { times, next: 0 }
    }

    /// Forcing-update instants for a run of length `end`.
    ///
    /// The union of `0, dt, 2·dt, …` and every forcing timestamp in
    /// `[0, end)`. No update is scheduled at `end` itself.
    pub fn forcing_updates(update_timestep: f64, end: f64, forcing_times: &[f64]) -> Self {
        let mut times = Vec::new();
        let mut k = 0_u64;
        loop {
            let t = k as f64 * update_timestep;
            if t >= end - TIME_EPS {
                break;
            }
            times.push(t);
            k += 1;
        }
        times.extend(
            forcing_times
                .iter()
                .copied()
                .filter(|&t| t >= 0.0 && t < end - TIME_EPS),
        );
        if times.is_empty() {
            times.push(0.0);
        }
        Self::from_times(times)
    }

    /// All instants, sorted.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Next instant not yet handed out.
    pub fn peek(&self) -> Option<f64> {
        self.times.get(self.next).copied()
    }

    /// Hands out the next instant and advances the cursor.
    pub fn tick(&mut self) -> Option<f64> {
        let t = self.peek()?;
        self.next += 1;
        Some(t)
    }

    /// Returns `true` if the next instant is due at or before `t`.
    pub fn is_due(&self, t: f64) -> bool {
        self.peek().is_some_and(|next| next <= t + TIME_EPS)
    }

    /// First instant strictly after `t`, whether handed out or not.
    pub fn next_after(&self, t: f64) -> Option<f64> {
        let idx = self.times.partition_point(|&s| s <= t + TIME_EPS);
        self.times.get(idx).copied()
    }

    /// Number of instants.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Returns `true` if the schedule holds no instants.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}
