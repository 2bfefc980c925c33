pub mod algorithm;
pub mod id;
pub mod service;

pub use algorithm::Algorithm;
pub use id::{generate_id, InstanceId, ServiceId};
pub use service::{
    Instance, InstanceStatus, RegisterRequest, Registration, ServiceDefinition, ServiceRecord,
    SignalSource, StatusSignal, DEFAULT_CATEGORY, DEFAULT_VERSION,
};
