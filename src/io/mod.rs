//! Table loading and result export.

pub mod export;
pub mod tables;
