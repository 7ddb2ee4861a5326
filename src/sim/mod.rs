pub mod allocation;
pub mod balance;
/// Cumulative flux volumes and per-basin balance rows.
pub mod bookkeeping;
/// Mapping between seconds since start and calendar time.
pub mod clock;
/// Storage-area-discharge-level relations.
pub mod curve;
pub mod engine;
/// Forward-filled time series of forcing and demand.
pub mod forcing;
pub mod integrator;
/// Directed routing network between basins.
pub mod network;
pub mod params;
pub mod report;
/// Ordered time stops for updates and saves.
pub mod schedule;
pub mod types;
