/// Atomic textfile publishing for node_exporter's textfile collector
pub mod file;

/// HTTP publishing of the latest encoded snapshot
pub mod serve;

pub use file::FilePublisher;
pub use serve::{LatestArtifact, ServePublisher};

use crate::error::PublishError;

/// Delivers encoded exposition text to its consumer
pub trait Publisher: Send + Sync {
    /// Make `artifact` the current output
    fn publish(&self, artifact: &str) -> Result<(), PublishError>;

    /// Told when a cycle ended without producing an artifact
    ///
    /// File publishers keep the last good file in place; serve publishers start
    /// answering with a server error.
    fn cycle_failed(&self, _reason: &str) {}

    /// Human-readable destination for log lines
    fn destination(&self) -> String;
}
