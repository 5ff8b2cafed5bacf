/// Layered exporter configuration
#[allow(clippy::module_inception)]
mod config;

pub use config::{Config, PublishMode};
