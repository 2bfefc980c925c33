pub mod discovery;
pub mod maintenance;
pub mod services;
pub mod store;

pub use discovery::{
    DiscoverOptions, HealthCheckService, HeartbeatService, LoadBalancerService, Probe, ServiceCatalog,
    ServiceDiscovery, ServiceRegistry, TcpProbe,
};
pub use maintenance::Maintenance;
pub use services::Services;
pub use store::{InMemoryStore, MirroredStore, RegistryStore};
