//! Ruler ring membership.
//!
//! A fleet of ruler instances shares a token ring stored in a KV store. Each
//! instance joins with a set of random tokens, heartbeats while it runs,
//! forgets peers that stopped heartbeating, and leaves on shutdown. Workload
//! keys are assigned to the instance owning the nearest token.

mod runtime;

pub use ruler_core;
pub use ruler_runtime;

pub use runtime::prelude;
pub use runtime::{Ruler, RulerBuilder, ServiceState};
