/// External command execution with timeouts
pub mod command;

/// Query abstraction over external diagnostic tools
pub mod source;

/// NVMe SMART metrics via nvme-cli and /proc/diskstats
pub mod nvme;

/// NVIDIA GPU metrics via nvidia-smi
pub mod gpu;

pub use command::CommandRunner;
pub use gpu::NvidiaSmiSource;
pub use nvme::NvmeSource;
pub use source::{SampleQuery, SampleSource};

use crate::encoder::MetricDescriptor;
use crate::error::SampleError;
use crate::records::{DeviceIdentity, MetricMap};
use serde::Deserialize;
use std::fmt;

/// Names of the per-exporter metrics for one device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExporterMetricNames {
    pub up: &'static str,
    pub devices: &'static str,
    pub duration: &'static str,
}

/// Hardware family an exporter samples
///
/// Each kind owns its descriptor table and knows how to parse the output of
/// its tools. The sources themselves are interchangeable behind
/// [`SampleSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Nvme,
    Gpu,
}

impl DeviceKind {
    pub fn descriptors(&self) -> &'static [MetricDescriptor] {
        match self {
            DeviceKind::Nvme => nvme::DESCRIPTORS,
            DeviceKind::Gpu => gpu::DESCRIPTORS,
        }
    }

    pub fn exporter_metrics(&self) -> ExporterMetricNames {
        match self {
            DeviceKind::Nvme => ExporterMetricNames {
                up: nvme::EXPORTER_UP,
                devices: nvme::EXPORTER_DEVICES,
                duration: nvme::EXPORTER_DURATION,
            },
            DeviceKind::Gpu => ExporterMetricNames {
                up: gpu::EXPORTER_UP,
                devices: gpu::EXPORTER_DEVICES,
                duration: gpu::EXPORTER_DURATION,
            },
        }
    }

    /// File name used by the textfile publisher when none is configured
    pub fn default_file_name(&self) -> &'static str {
        match self {
            DeviceKind::Nvme => "nvme_metrics.prom",
            DeviceKind::Gpu => "gpu_metrics.prom",
        }
    }

    /// Whether the optional I/O statistics query applies to this kind
    pub fn collects_io_stats(&self) -> bool {
        matches!(self, DeviceKind::Nvme)
    }

    pub fn parse_listing(&self, raw: &str) -> Result<Vec<String>, SampleError> {
        match self {
            DeviceKind::Nvme => nvme::parse_listing(raw),
            DeviceKind::Gpu => gpu::parse_listing(raw),
        }
    }

    pub fn parse_info(&self, device: &str, raw: &str) -> Result<DeviceIdentity, SampleError> {
        match self {
            DeviceKind::Nvme => nvme::parse_info(device, raw),
            DeviceKind::Gpu => gpu::parse_info(device, raw),
        }
    }

    pub fn parse_health(&self, device: &str, raw: &str) -> Result<MetricMap, SampleError> {
        match self {
            DeviceKind::Nvme => nvme::parse_health(device, raw),
            DeviceKind::Gpu => gpu::parse_health(device, raw),
        }
    }

    pub fn parse_io_stats(
        &self,
        device: &str,
        raw: &str,
    ) -> Result<Option<MetricMap>, SampleError> {
        match self {
            DeviceKind::Nvme => nvme::parse_io_stats(device, raw),
            DeviceKind::Gpu => Ok(None),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Nvme => f.write_str("nvme"),
            DeviceKind::Gpu => f.write_str("gpu"),
        }
    }
}
