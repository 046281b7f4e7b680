//! Ring membership runtime: store client, lifecycler and health monitor.

pub mod kv;
pub mod ring;
pub mod testing;

pub use kv::InMemoryKv;
pub use ring::{
    HealthMonitor, HealthMonitorConfig, Lifecycler, LifecyclerConfig, RingClient,
    RingClientConfig,
};
