use crate::collectors::command::CommandRunner;
use crate::collectors::source::{SampleQuery, SampleSource};
use crate::encoder::MetricDescriptor;
use crate::error::SampleError;
use crate::records::{DeviceIdentity, MetricMap, MetricValue};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Offset used to turn the SMART composite temperature (Kelvin) into Celsius.
///
/// This is 273, not 273.15: readings are truncated and can sit up to one
/// degree below the precise conversion.
pub const KELVIN_OFFSET: i64 = 273;

pub const TEMPERATURE: &str = "nvme_temperature_celsius";
pub const AVAILABLE_SPARE: &str = "nvme_available_spare_percent";
pub const PERCENTAGE_USED: &str = "nvme_percentage_used";
pub const CRITICAL_WARNING: &str = "nvme_critical_warning";
pub const DATA_UNITS_READ: &str = "nvme_data_units_read_total";
pub const DATA_UNITS_WRITTEN: &str = "nvme_data_units_written_total";
pub const HOST_READ_COMMANDS: &str = "nvme_host_read_commands_total";
pub const HOST_WRITE_COMMANDS: &str = "nvme_host_write_commands_total";
pub const POWER_ON_HOURS: &str = "nvme_power_on_hours_total";
pub const POWER_CYCLES: &str = "nvme_power_cycles_total";
pub const UNSAFE_SHUTDOWNS: &str = "nvme_unsafe_shutdowns_total";
pub const MEDIA_ERRORS: &str = "nvme_media_errors_total";
pub const IO_IN_PROGRESS: &str = "nvme_io_in_progress";
pub const READS_COMPLETED: &str = "nvme_reads_completed_total";
pub const WRITES_COMPLETED: &str = "nvme_writes_completed_total";
pub const SECTORS_READ: &str = "nvme_sectors_read_total";
pub const SECTORS_WRITTEN: &str = "nvme_sectors_written_total";
pub const IO_TIME: &str = "nvme_io_time_seconds_total";

pub const EXPORTER_UP: &str = "nvme_exporter_up";
pub const EXPORTER_DEVICES: &str = "nvme_exporter_devices";
pub const EXPORTER_DURATION: &str = "nvme_exporter_sample_duration_seconds";

pub const DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor::gauge(TEMPERATURE, "Current temperature of NVMe device in Celsius"),
    MetricDescriptor::gauge(AVAILABLE_SPARE, "Available spare capacity percentage"),
    MetricDescriptor::gauge(PERCENTAGE_USED, "Percentage of rated endurance used"),
    MetricDescriptor::gauge(
        CRITICAL_WARNING,
        "Critical warning indicator (0=ok, >0=warning)",
    ),
    MetricDescriptor::counter(DATA_UNITS_READ, "Total data units read (512-byte units)"),
    MetricDescriptor::counter(
        DATA_UNITS_WRITTEN,
        "Total data units written (512-byte units)",
    ),
    MetricDescriptor::counter(HOST_READ_COMMANDS, "Total host read commands"),
    MetricDescriptor::counter(HOST_WRITE_COMMANDS, "Total host write commands"),
    MetricDescriptor::counter(POWER_ON_HOURS, "Total power-on hours"),
    MetricDescriptor::counter(POWER_CYCLES, "Total power cycles"),
    MetricDescriptor::counter(UNSAFE_SHUTDOWNS, "Total unsafe shutdowns"),
    MetricDescriptor::counter(MEDIA_ERRORS, "Total media errors"),
    MetricDescriptor::gauge(IO_IN_PROGRESS, "Current I/O operations in progress"),
    MetricDescriptor::counter(READS_COMPLETED, "Total reads completed successfully"),
    MetricDescriptor::counter(WRITES_COMPLETED, "Total writes completed successfully"),
    MetricDescriptor::counter(SECTORS_READ, "Total sectors read"),
    MetricDescriptor::counter(SECTORS_WRITTEN, "Total sectors written"),
    MetricDescriptor::counter(IO_TIME, "Total time spent doing I/O in seconds"),
    MetricDescriptor::gauge(
        EXPORTER_UP,
        "Whether the last NVMe listing and sampling cycle succeeded",
    )
    .exporter_scoped(),
    MetricDescriptor::gauge(EXPORTER_DEVICES, "Number of NVMe devices sampled in the last cycle")
        .exporter_scoped(),
    MetricDescriptor::gauge(
        EXPORTER_DURATION,
        "Duration of the last NVMe sampling cycle in seconds",
    )
    .exporter_scoped(),
];

/// Default location of the kernel's per-disk I/O statistics
pub const DEFAULT_DISKSTATS_PATH: &str = "/proc/diskstats";

/// Sample source backed by `nvme-cli` and `/proc/diskstats`
#[derive(Debug, Clone)]
pub struct NvmeSource {
    runner: CommandRunner,
    binary: String,
    diskstats_path: PathBuf,
}

impl NvmeSource {
    pub fn new(runner: CommandRunner, diskstats_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            binary: "nvme".to_string(),
            diskstats_path: diskstats_path.into(),
        }
    }

    pub fn diskstats_path(&self) -> &Path {
        &self.diskstats_path
    }
}

impl SampleSource for NvmeSource {
    fn query(&self, query: &SampleQuery) -> Result<String, SampleError> {
        match query {
            SampleQuery::Listing => self.runner.run(&self.binary, &["list", "-o", "json"]),
            SampleQuery::Info(device) => {
                let node = format!("/dev/{}", device);
                self.runner.run(&self.binary, &["id-ctrl", node.as_str(), "-o", "json"])
            }
            SampleQuery::Health(device) => {
                let node = format!("/dev/{}", device);
                self.runner
                    .run(&self.binary, &["smart-log", node.as_str(), "-o", "json"])
            }
            SampleQuery::IoStats(_) => std::fs::read_to_string(&self.diskstats_path)
                .map_err(|e| SampleError::unavailable(self.diskstats_path.display().to_string(), e)),
        }
    }
}

/// Convert a raw Kelvin reading; non-positive readings map to 0
pub fn kelvin_to_celsius(kelvin: u64) -> i64 {
    if kelvin == 0 {
        return 0;
    }
    i64::try_from(kelvin).unwrap_or(i64::MAX) - KELVIN_OFFSET
}

/// Extract controller names (`nvme0`, `nvme1`, ...) from `nvme list -o json`
///
/// Both the flat `Devices[].DevicePath` layout and the nested subsystem layout
/// of newer nvme-cli releases are handled by collecting every `DevicePath`.
pub fn parse_listing(raw: &str) -> Result<Vec<String>, SampleError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| SampleError::parse("nvme list output", e))?;

    let mut paths = Vec::new();
    collect_device_paths(&value, &mut paths);

    Ok(paths
        .into_iter()
        .filter_map(|path| controller_name(&path))
        .collect())
}

fn collect_device_paths(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("DevicePath", Value::String(path)) => out.push(path.clone()),
                    _ => collect_device_paths(child, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_device_paths(item, out)),
        _ => {}
    }
}

/// `/dev/nvme0n1` -> `nvme0`
fn controller_name(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/dev/nvme")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("nvme{}", digits))
    }
}

/// Parse `nvme id-ctrl -o json` into model and serial
pub fn parse_info(device: &str, raw: &str) -> Result<DeviceIdentity, SampleError> {
    let object = parse_object(raw, || format!("id-ctrl output for {}", device))?;
    let text = |key: &str| object.get(key).and_then(Value::as_str).unwrap_or("");
    Ok(DeviceIdentity::new(text("mn"), text("sn")))
}

/// Parse `nvme smart-log -o json` into normalized metrics
///
/// Missing counters default to zero. Key spellings differ between nvme-cli
/// releases, so each metric accepts its known aliases.
pub fn parse_health(device: &str, raw: &str) -> Result<MetricMap, SampleError> {
    let object = parse_object(raw, || format!("smart-log output for {}", device))?;
    let field = |keys: &[&str]| -> u64 {
        keys.iter()
            .find_map(|key| object.get(*key))
            .and_then(as_u64)
            .unwrap_or(0)
    };

    let mut metrics = MetricMap::new();
    metrics.insert(
        TEMPERATURE,
        MetricValue::Int(kelvin_to_celsius(field(&["temperature"]))),
    );
    metrics.insert(CRITICAL_WARNING, field(&["critical_warning"]).into());
    metrics.insert(
        AVAILABLE_SPARE,
        field(&["available_spare", "avail_spare"]).into(),
    );
    metrics.insert(
        PERCENTAGE_USED,
        field(&["percentage_used", "percent_used"]).into(),
    );
    metrics.insert(DATA_UNITS_READ, field(&["data_units_read"]).into());
    metrics.insert(DATA_UNITS_WRITTEN, field(&["data_units_written"]).into());
    metrics.insert(HOST_READ_COMMANDS, field(&["host_read_commands"]).into());
    metrics.insert(HOST_WRITE_COMMANDS, field(&["host_write_commands"]).into());
    metrics.insert(POWER_ON_HOURS, field(&["power_on_hours"]).into());
    metrics.insert(POWER_CYCLES, field(&["power_cycles"]).into());
    metrics.insert(UNSAFE_SHUTDOWNS, field(&["unsafe_shutdowns"]).into());
    metrics.insert(MEDIA_ERRORS, field(&["media_errors"]).into());
    Ok(metrics)
}

/// Parse the `<device>n1` row of `/proc/diskstats`
///
/// Returns `Ok(None)` when the namespace has no row, which happens for
/// controllers without an attached namespace.
pub fn parse_io_stats(device: &str, raw: &str) -> Result<Option<MetricMap>, SampleError> {
    let namespace = format!("{}n1", device);
    let Some(fields) = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|fields| fields.len() >= 14 && fields[2] == namespace)
    else {
        return Ok(None);
    };

    let number = |idx: usize| -> Result<u64, SampleError> {
        fields[idx].parse::<u64>().map_err(|e| {
            SampleError::parse(format!("diskstats field {} for {}", idx, namespace), e)
        })
    };

    let mut metrics = MetricMap::new();
    metrics.insert(READS_COMPLETED, number(3)?.into());
    metrics.insert(SECTORS_READ, number(5)?.into());
    metrics.insert(WRITES_COMPLETED, number(7)?.into());
    metrics.insert(SECTORS_WRITTEN, number(9)?.into());
    metrics.insert(IO_IN_PROGRESS, number(11)?.into());
    metrics.insert(
        IO_TIME,
        MetricValue::Float(number(12)? as f64 / 1000.0),
    );
    Ok(Some(metrics))
}

fn parse_object(
    raw: &str,
    context: impl FnOnce() -> String,
) -> Result<Map<String, Value>, SampleError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SampleError::parse(
            context(),
            format!("expected a JSON object, got {}", kind_of(&other)),
        )),
        Err(e) => Err(SampleError::parse(context(), e)),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Lenient numeric read: numbers, decimal strings, or `{"value": n}` objects
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        Value::Object(map) => map.get("value").and_then(as_u64),
        _ => None,
    }
}
