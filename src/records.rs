//! Core record types shared by the sampler, encoder and publishers
//!
//! A [`Snapshot`] is built fresh on every scheduler tick and thrown away once it
//! has been encoded. Nothing in here survives between cycles.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Label value used when a tool does not report a model or serial
pub const UNKNOWN_LABEL: &str = "unknown";

/// Numeric sample value
///
/// Integers and floats are kept apart so the encoder can render each in its
/// natural form. Scrapers take the metric type from `# TYPE`, not from this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Float(v) if v.is_nan() => f.write_str("NaN"),
            MetricValue::Float(v) if v.is_infinite() => {
                f.write_str(if v > 0.0 { "+Inf" } else { "-Inf" })
            }
            MetricValue::Float(v) if v.fract() == 0.0 => write!(f, "{:.1}", v),
            MetricValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

/// Metric name to value, as produced by one device query
pub type MetricMap = BTreeMap<&'static str, MetricValue>;

/// Identity reported by a device-info query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub model: String,
    pub serial: String,
}

impl DeviceIdentity {
    /// Build an identity, substituting [`UNKNOWN_LABEL`] for blank fields
    pub fn new(model: &str, serial: &str) -> Self {
        Self {
            model: or_unknown(model),
            serial: or_unknown(serial),
        }
    }
}

fn or_unknown(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// One fully sampled device
///
/// Records are only ever built complete. A device whose mandatory queries fail
/// never gets a record at all.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    device_id: String,
    identity: DeviceIdentity,
    metrics: MetricMap,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>, identity: DeviceIdentity, metrics: MetricMap) -> Self {
        Self {
            device_id: device_id.into(),
            identity,
            metrics,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn model(&self) -> &str {
        &self.identity.model
    }

    pub fn serial(&self) -> &str {
        &self.identity.serial
    }

    /// Value for `metric`, or `None` when the device did not report it
    pub fn metric(&self, metric: &str) -> Option<MetricValue> {
        self.metrics.get(metric).copied()
    }

    pub fn metrics(&self) -> &MetricMap {
        &self.metrics
    }
}

/// One cycle's complete set of sampled devices
///
/// Devices iterate in ascending `device_id` order, which keeps the encoded
/// output reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    taken_at: DateTime<Utc>,
    devices: BTreeMap<String, DeviceRecord>,
    exporter: MetricMap,
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            devices: BTreeMap::new(),
            exporter: MetricMap::new(),
        }
    }

    /// Add a device record, replacing any earlier record for the same id
    pub fn insert(&mut self, record: DeviceRecord) {
        self.devices.insert(record.device_id.clone(), record);
    }

    /// Set a per-process metric that carries no device labels
    pub fn set_exporter_metric(&mut self, name: &'static str, value: MetricValue) {
        self.exporter.insert(name, value);
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(device_id)
    }

    pub fn exporter_metric(&self, name: &str) -> Option<MetricValue> {
        self.exporter.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
