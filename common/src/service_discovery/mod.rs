pub mod endpoint_cache;
pub mod lifecycle;

pub use endpoint_cache::EndpointCache;
pub use lifecycle::{DiscoveryOptions, RegistrationState, RetryPolicy, ServiceDiscovery};
