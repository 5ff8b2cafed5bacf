use crate::collectors::command::CommandRunner;
use crate::collectors::source::{SampleQuery, SampleSource};
use crate::encoder::MetricDescriptor;
use crate::error::SampleError;
use crate::records::{DeviceIdentity, MetricMap, MetricValue};

pub const TEMPERATURE: &str = "nvidia_gpu_temperature_celsius";
pub const UTILIZATION: &str = "nvidia_gpu_utilization_percent";
pub const MEMORY_UTILIZATION: &str = "nvidia_gpu_memory_utilization_percent";
pub const MEMORY_TOTAL: &str = "nvidia_gpu_memory_total_bytes";
pub const MEMORY_USED: &str = "nvidia_gpu_memory_used_bytes";
pub const MEMORY_FREE: &str = "nvidia_gpu_memory_free_bytes";
pub const POWER_DRAW: &str = "nvidia_gpu_power_draw_watts";
pub const POWER_LIMIT: &str = "nvidia_gpu_power_limit_watts";

pub const EXPORTER_UP: &str = "nvidia_gpu_exporter_up";
pub const EXPORTER_DEVICES: &str = "nvidia_gpu_exporter_devices";
pub const EXPORTER_DURATION: &str = "nvidia_gpu_exporter_sample_duration_seconds";

pub const DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor::gauge(TEMPERATURE, "GPU temperature in Celsius"),
    MetricDescriptor::gauge(UTILIZATION, "GPU utilization percentage"),
    MetricDescriptor::gauge(MEMORY_UTILIZATION, "GPU memory utilization percentage"),
    MetricDescriptor::gauge(MEMORY_TOTAL, "GPU total memory in bytes"),
    MetricDescriptor::gauge(MEMORY_USED, "GPU used memory in bytes"),
    MetricDescriptor::gauge(MEMORY_FREE, "GPU free memory in bytes"),
    MetricDescriptor::gauge(POWER_DRAW, "GPU power draw in watts"),
    MetricDescriptor::gauge(POWER_LIMIT, "GPU power limit in watts"),
    MetricDescriptor::gauge(
        EXPORTER_UP,
        "Whether the last GPU listing and sampling cycle succeeded",
    )
    .exporter_scoped(),
    MetricDescriptor::gauge(EXPORTER_DEVICES, "Number of GPUs sampled in the last cycle")
        .exporter_scoped(),
    MetricDescriptor::gauge(
        EXPORTER_DURATION,
        "Duration of the last GPU sampling cycle in seconds",
    )
    .exporter_scoped(),
];

const HEALTH_FIELDS: &str = "temperature.gpu,utilization.gpu,utilization.memory,memory.total,\
memory.used,memory.free,power.draw,power.limit";
const HEALTH_COLUMNS: usize = 8;
const CSV_FORMAT: &str = "--format=csv,noheader,nounits";
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Sample source backed by `nvidia-smi`
#[derive(Debug, Clone)]
pub struct NvidiaSmiSource {
    runner: CommandRunner,
    binary: String,
}

impl NvidiaSmiSource {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            binary: "nvidia-smi".to_string(),
        }
    }
}

impl SampleSource for NvidiaSmiSource {
    fn query(&self, query: &SampleQuery) -> Result<String, SampleError> {
        match query {
            SampleQuery::Listing => self
                .runner
                .run(&self.binary, &["--query-gpu=index", CSV_FORMAT]),
            SampleQuery::Info(index) => self.runner.run(
                &self.binary,
                &["-i", index.as_str(), "--query-gpu=name,serial", CSV_FORMAT],
            ),
            SampleQuery::Health(index) => {
                let fields = format!("--query-gpu={}", HEALTH_FIELDS);
                self.runner
                    .run(&self.binary, &["-i", index.as_str(), fields.as_str(), CSV_FORMAT])
            }
            SampleQuery::IoStats(_) => Err(SampleError::unavailable(
                &self.binary,
                "per-device I/O statistics are not reported for GPUs",
            )),
        }
    }
}

/// Parse the index column printed by `nvidia-smi --query-gpu=index`
pub fn parse_listing(raw: &str) -> Result<Vec<String>, SampleError> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.chars().all(|c| c.is_ascii_digit()) {
                Ok(line.to_string())
            } else {
                Err(SampleError::parse(
                    "nvidia-smi index listing",
                    format!("unexpected line '{}'", line),
                ))
            }
        })
        .collect()
}

/// Parse a `name, serial` row
pub fn parse_info(device: &str, raw: &str) -> Result<DeviceIdentity, SampleError> {
    let line = first_row(raw).ok_or_else(|| {
        SampleError::parse(format!("nvidia-smi info for GPU {}", device), "empty output")
    })?;
    // Serial never contains a comma, names occasionally do
    let (name, serial) = line.rsplit_once(',').ok_or_else(|| {
        SampleError::parse(
            format!("nvidia-smi info for GPU {}", device),
            format!("expected 2 columns in '{}'", line),
        )
    })?;

    Ok(DeviceIdentity::new(
        supported(name).unwrap_or(""),
        supported(serial).unwrap_or(""),
    ))
}

/// Parse the health row into normalized metrics
///
/// Unsupported readings become zero. Memory is reported in MiB and published
/// in bytes.
pub fn parse_health(device: &str, raw: &str) -> Result<MetricMap, SampleError> {
    let context = || format!("nvidia-smi health for GPU {}", device);
    let line = first_row(raw).ok_or_else(|| SampleError::parse(context(), "empty output"))?;
    let columns: Vec<&str> = line.split(',').map(str::trim).collect();
    if columns.len() < HEALTH_COLUMNS {
        return Err(SampleError::parse(
            context(),
            format!("expected {} columns, got {}", HEALTH_COLUMNS, columns.len()),
        ));
    }

    let reading = |idx: usize| -> Result<f64, SampleError> {
        match supported(columns[idx]) {
            None => Ok(0.0),
            Some(text) => text.parse::<f64>().map_err(|e| {
                SampleError::parse(context(), format!("column {} ('{}'): {}", idx, text, e))
            }),
        }
    };

    let mut metrics = MetricMap::new();
    metrics.insert(TEMPERATURE, MetricValue::Float(reading(0)?));
    metrics.insert(UTILIZATION, MetricValue::Float(reading(1)?));
    metrics.insert(MEMORY_UTILIZATION, MetricValue::Float(reading(2)?));
    metrics.insert(MEMORY_TOTAL, mib_to_bytes(reading(3)?));
    metrics.insert(MEMORY_USED, mib_to_bytes(reading(4)?));
    metrics.insert(MEMORY_FREE, mib_to_bytes(reading(5)?));
    metrics.insert(POWER_DRAW, MetricValue::Float(reading(6)?));
    metrics.insert(POWER_LIMIT, MetricValue::Float(reading(7)?));
    Ok(metrics)
}

pub fn mib_to_bytes(mib: f64) -> MetricValue {
    MetricValue::Int((mib * BYTES_PER_MIB) as i64)
}

fn first_row(raw: &str) -> Option<&str> {
    raw.lines().map(str::trim).find(|line| !line.is_empty())
}

/// `None` for placeholders nvidia-smi prints in place of a reading
fn supported(value: &str) -> Option<&str> {
    let value = value.trim();
    match value {
        "" | "[Not Supported]" | "[N/A]" | "N/A" | "[Unknown Error]" => None,
        other => Some(other),
    }
}
