pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod service_discovery;
pub mod service_register_center;
pub mod utils;

pub use error::{Error, Result};
