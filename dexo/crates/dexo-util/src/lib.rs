//! dexo-util - Core utilities shared by the dexo crates
//!
//! - [`IndexVec`] / [`Idx`]: vectors indexed by typed ids (blocks, methods,
//!   summary-graph nodes)
//! - [`ConcurrentCounter`]: sharded occurrence counter safe to bump from many
//!   threads at once
//! - `FxHashMap` / `FxHashSet`: the hash maps used throughout the workspace

pub mod concurrent;
pub mod index_vec;

pub use concurrent::ConcurrentCounter;
pub use index_vec::{Idx, IndexVec};

// Re-export commonly used types
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
