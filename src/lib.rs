/// Error types for the exporter
pub mod error;

/// Snapshot and device record types
pub mod records;

/// Injectable diagnostic sink
pub mod reporter;

/// External tool access and output parsing
pub mod collectors;

/// Prometheus text exposition
pub mod encoder;

/// Device discovery
pub mod enumerator;

/// Per-device sampling
pub mod sampler;

/// File and HTTP publishing
pub mod publisher;

/// One enumerate, sample, encode, publish pass
pub mod pipeline;

/// Interval driver and shutdown signal
pub mod scheduler;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use collectors::DeviceKind;
pub use config::{Config, PublishMode};
pub use error::{ConfigError, CycleError, PublishError, SampleError};
pub use pipeline::{CycleSummary, Pipeline};
pub use records::{DeviceRecord, MetricValue, Snapshot};
pub use scheduler::{Scheduler, Shutdown, SystemClock};
