//! Lumped-basin water balance simulator.
//!
//! A network of basins exchanges water along fractional routing edges while
//! precipitation, evaporation and user demand are refreshed on a fixed
//! schedule. Storage is integrated in continuous time and every flux is
//! booked so the run can report its own mass balance.

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod error;
/// CSV input tables and result export.
pub mod io;
pub mod scenario;
/// Simulation engine, balance model, solver and bookkeeping.
pub mod sim;
