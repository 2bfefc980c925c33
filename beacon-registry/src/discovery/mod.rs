//! Service registry, liveness tracking and instance selection

pub mod catalog;
pub mod health_check;
pub mod heartbeat;
pub mod load_balancer;
pub mod probe;
pub mod registry;
pub mod resolver;

pub use catalog::{CatalogEntry, CatalogQuery, ServiceCatalog};
pub use health_check::{
    CheckOptions, HealthCheckResult, HealthCheckService, HealthSummary, HealthSweep, InstanceHealthStats,
    ServiceHealthReport,
};
pub use heartbeat::{HeartbeatRecord, HeartbeatService, HeartbeatSettings, HeartbeatStats, InactiveService};
pub use load_balancer::{LoadBalancerService, LoadBalancerStats};
pub use probe::{FnProbe, Probe, ProbeOutcome, TcpProbe};
pub use registry::{RegistryStats, Removal, RemovalListener, ServiceRegistry};
pub use resolver::{DiscoverOptions, DiscoveryCacheStats, DiscoveryResult, ServiceDiscovery};
