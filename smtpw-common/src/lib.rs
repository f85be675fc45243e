pub mod error;
pub mod logging;
pub mod tenant;

pub use error::ConfigError;
pub use tenant::{TenantConfig, TenantRegistry};
pub use tracing;

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
