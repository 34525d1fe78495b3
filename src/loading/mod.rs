//! # Load Coordination
//!
//! [`Loading`] tracks which [`LoadController`]s are in flight for each key and
//! broadcasts `{key}/start` and `{key}/end`. A controller wraps one load,
//! registers itself on construction and, when its work settles, commits the
//! result to the cache in start order unless it was cancelled.

pub mod controller;
pub mod registry;

pub use controller::{LoadController, LoadState};
pub use registry::{Loading, LoadingEventKind, WeakLoading};
