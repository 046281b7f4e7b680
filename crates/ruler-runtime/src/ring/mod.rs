mod client;
mod health;
mod lifecycler;

pub use client::{RingClient, RingClientConfig};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use lifecycler::{Lifecycler, LifecyclerConfig};
