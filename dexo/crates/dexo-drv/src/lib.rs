//! dexo-drv - Pass driver
//!
//! Binds per-pass configuration, runs passes over a whole-program scope and
//! collects their metrics.

pub mod config;
pub mod cse_pass;
pub mod error;
pub mod pass;

pub use config::{CseConfig, PassConfig};
pub use cse_pass::{CommonSubexpressionEliminationPass, CSE_PASS_NAME};
pub use error::{PassError, Result};
pub use pass::{Metrics, MetricsSink, Pass, PassManager};
