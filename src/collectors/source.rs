use crate::error::SampleError;
use std::fmt;

/// One request for raw tool output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SampleQuery {
    /// Enumerate the devices present on the host
    Listing,
    /// Model and serial for one device
    Info(String),
    /// Health / SMART counters for one device
    Health(String),
    /// Kernel I/O statistics for one device
    IoStats(String),
}

impl SampleQuery {
    /// Short name of the query kind, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            SampleQuery::Listing => "listing",
            SampleQuery::Info(_) => "info",
            SampleQuery::Health(_) => "health",
            SampleQuery::IoStats(_) => "iostat",
        }
    }

    pub fn device(&self) -> Option<&str> {
        match self {
            SampleQuery::Listing => None,
            SampleQuery::Info(d) | SampleQuery::Health(d) | SampleQuery::IoStats(d) => Some(d),
        }
    }
}

impl fmt::Display for SampleQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device() {
            Some(device) => write!(f, "{} ({})", self.kind(), device),
            None => f.write_str(self.kind()),
        }
    }
}

/// Provider of raw structured tool output
///
/// Real implementations shell out to `nvme-cli`, `nvidia-smi` or read kernel
/// statistics files. Parsing lives with the device profile, so a fake source
/// only needs to hand back canned text.
#[cfg_attr(test, mockall::automock)]
pub trait SampleSource: Send + Sync {
    fn query(&self, query: &SampleQuery) -> Result<String, SampleError>;
}
