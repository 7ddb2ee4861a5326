//! Priority-ordered allocation of available water between users.

/// One user's claim on a basin's available water.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    /// User label.
    pub user: String,
    /// Priority rank; lower is served first.
    pub priority: u32,
    /// Requested rate (m³/s).
    pub demand: f64,
}

impl AllocationRequest {
    pub fn new(user: impl Into<String>, priority: u32, demand: f64) -> Self {
        Self {
            user: user.into(),
            priority,
            demand,
        }
    }
}

/// Rate granted to one user.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    pub user: String,
    pub allocated: f64,
}

/// Splits `available` between `requests` in priority order.
///
/// Requests are served lowest priority rank first, ties in submission order.
/// Each receives `min(demand, remaining)`. Results are returned in
/// submission order. Negative or non-finite `available` is treated as zero
/// and negative demands receive nothing.
///
/// # Examples
///
/// ```
/// use basin_sim::sim::allocation::{allocate, AllocationRequest};
///
/// let requests = [
///     AllocationRequest::new("city", 1, 10.0),
///     AllocationRequest::new("farm", 2, 15.0),
/// ];
/// let results = allocate(12.0, &requests);
/// assert_eq!(results[0].allocated, 10.0);
/// assert_eq!(results[1].allocated, 2.0);
/// ```
pub fn allocate(available: f64, requests: &[AllocationRequest]) -> Vec<AllocationResult> {
    let mut order: Vec<usize> = (0..requests.len()).collect();
    // stable: equal priorities keep submission order
    order.sort_by_key(|&i| requests[i].priority);

    let mut remaining = if available.is_finite() {
        available.max(0.0)
    } else {
        0.0
    };
    let mut allocated = vec![0.0; requests.len()];
    for i in order {
        let demand = requests[i].demand;
        if !(demand.is_finite() && demand > 0.0) || remaining <= 0.0 {
            continue;
        }
        let grant = demand.min(remaining);
        allocated[i] = grant;
        remaining -= grant;
    }

    requests
        .iter()
        .zip(allocated)
        .map(|(r, allocated)| AllocationResult {
            user: r.user.clone(),
            allocated,
        })
        .collect()
}

/// Net un-managed supply of a basin (m³/s).
///
/// Defined over an interval `Δt` as
/// `((P·Δt − E·Δt)·area)/Δt − min(0, infiltration − drainage − urban_runoff)`
/// with `precipitation` and `evaporation` as rates (m/s). The interval
/// cancels, leaving `(P − E)·area` for the first term. Floored at zero.
pub fn available_supply(
    precipitation: f64,
    evaporation: f64,
    area: f64,
    drainage: f64,
    infiltration: f64,
    urban_runoff: f64,
) -> f64 {
    let uncovered = (infiltration - drainage - urban_runoff).min(0.0);
    let supply = (precipitation - evaporation) * area - uncovered;
    supply.max(0.0)
}
