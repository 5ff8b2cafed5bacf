//! Prometheus text exposition encoding
//!
//! Output is fully determined by the snapshot and the descriptor table:
//! descriptors in declared order, devices in ascending id order, one trailing
//! newline.

use crate::records::Snapshot;
use std::fmt::Write as _;

/// Content type served alongside encoded output
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Which values a descriptor draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricScope {
    /// One sample per device, labelled `{device, model, serial}`
    Device,
    /// One unlabelled sample describing the exporter itself
    Exporter,
}

/// Static metadata for one published metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub scope: MetricScope,
}

impl MetricDescriptor {
    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            scope: MetricScope::Device,
        }
    }

    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            scope: MetricScope::Device,
        }
    }

    /// Same descriptor, but sampled once per exporter instead of per device
    pub const fn exporter_scoped(self) -> Self {
        Self {
            scope: MetricScope::Exporter,
            ..self
        }
    }
}

/// Encode `snapshot` against `descriptors` in the text exposition format
pub fn encode(snapshot: &Snapshot, descriptors: &[MetricDescriptor]) -> String {
    let mut out = String::new();

    for descriptor in descriptors {
        // Writing into a String cannot fail
        let _ = writeln!(out, "# HELP {} {}", descriptor.name, escape_help(descriptor.help));
        let _ = writeln!(out, "# TYPE {} {}", descriptor.name, descriptor.kind.as_str());

        match descriptor.scope {
            MetricScope::Device => {
                for device in snapshot.devices() {
                    if let Some(value) = device.metric(descriptor.name) {
                        let _ = writeln!(
                            out,
                            "{}{{device=\"{}\",model=\"{}\",serial=\"{}\"}} {}",
                            descriptor.name,
                            escape_label(device.device_id()),
                            escape_label(device.model()),
                            escape_label(device.serial()),
                            value
                        );
                    }
                }
            }
            MetricScope::Exporter => {
                if let Some(value) = snapshot.exporter_metric(descriptor.name) {
                    let _ = writeln!(out, "{} {}", descriptor.name, value);
                }
            }
        }
    }

    out
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DeviceIdentity, DeviceRecord, MetricMap, MetricValue};
    use chrono::{TimeZone, Utc};

    const TABLE: &[MetricDescriptor] = &[
        MetricDescriptor::gauge("test_temperature_celsius", "Temperature in Celsius"),
        MetricDescriptor::counter("test_errors_total", "Total errors"),
        MetricDescriptor::gauge("test_exporter_up", "Whether the exporter is working")
            .exporter_scoped(),
    ];

    fn record(id: &str, metrics: &[(&'static str, MetricValue)]) -> DeviceRecord {
        DeviceRecord::new(
            id,
            DeviceIdentity::new("Model X", "SN1"),
            metrics.iter().copied().collect::<MetricMap>(),
        )
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(Utc.with_ymd_and_hms(2024, 12, 9, 18, 30, 45).unwrap())
    }

    #[test]
    fn test_empty_snapshot_still_has_headers() {
        let output = encode(&snapshot(), TABLE);
        assert_eq!(
            output,
            "# HELP test_temperature_celsius Temperature in Celsius\n\
             # TYPE test_temperature_celsius gauge\n\
             # HELP test_errors_total Total errors\n\
             # TYPE test_errors_total counter\n\
             # HELP test_exporter_up Whether the exporter is working\n\
             # TYPE test_exporter_up gauge\n"
        );
    }

    #[test]
    fn test_samples_follow_headers_in_device_order() {
        let mut snap = snapshot();
        snap.insert(record(
            "dev1",
            &[("test_temperature_celsius", MetricValue::Int(40))],
        ));
        snap.insert(record(
            "dev0",
            &[
                ("test_temperature_celsius", MetricValue::Int(27)),
                ("test_errors_total", MetricValue::Int(0)),
            ],
        ));
        snap.set_exporter_metric("test_exporter_up", MetricValue::Int(1));

        let output = encode(&snap, TABLE);
        let expected = "# HELP test_temperature_celsius Temperature in Celsius\n\
# TYPE test_temperature_celsius gauge\n\
test_temperature_celsius{device=\"dev0\",model=\"Model X\",serial=\"SN1\"} 27\n\
test_temperature_celsius{device=\"dev1\",model=\"Model X\",serial=\"SN1\"} 40\n\
# HELP test_errors_total Total errors\n\
# TYPE test_errors_total counter\n\
test_errors_total{device=\"dev0\",model=\"Model X\",serial=\"SN1\"} 0\n\
# HELP test_exporter_up Whether the exporter is working\n\
# TYPE test_exporter_up gauge\n\
test_exporter_up 1\n";
        assert_eq!(output, expected);
    }

    #[test]
    fn test_single_trailing_newline() {
        let mut snap = snapshot();
        snap.insert(record(
            "dev0",
            &[("test_temperature_celsius", MetricValue::Float(31.5))],
        ));
        let output = encode(&snap, TABLE);
        assert!(output.ends_with('\n'));
        assert!(!output.ends_with("\n\n"));
        assert!(output.contains("} 31.5\n"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let mut snap = snapshot();
        snap.insert(DeviceRecord::new(
            "dev0",
            DeviceIdentity::new("Odd \"Model\" \\ A", "line\nbreak"),
            [("test_errors_total", MetricValue::Int(2))]
                .into_iter()
                .collect(),
        ));

        let output = encode(&snap, TABLE);
        assert!(output.contains(
            "test_errors_total{device=\"dev0\",model=\"Odd \\\"Model\\\" \\\\ A\",serial=\"line\\nbreak\"} 2\n"
        ));
    }

    #[test]
    fn test_metric_absent_for_device_emits_no_line() {
        let mut snap = snapshot();
        snap.insert(record("dev0", &[]));
        let output = encode(&snap, TABLE);
        assert!(!output.contains("dev0"));
    }
}
