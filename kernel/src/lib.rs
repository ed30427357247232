// Driftloop Kernel
//
// Drift-to-retrain control loop: measure drift between a reference and a
// current dataset, classify it, and on approval blend the reference toward
// the current distribution, retrain, and persist atomically.

pub mod blend;
pub mod config;
pub mod cycle;
pub mod dataset;
pub mod drift;
pub mod model;
pub mod resolve;
pub mod severity;
pub mod simulate;
pub mod store;
