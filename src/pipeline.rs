use crate::collectors::DeviceKind;
use crate::encoder::encode;
use crate::enumerator::DeviceEnumerator;
use crate::error::CycleError;
use crate::publisher::Publisher;
use crate::records::MetricValue;
use crate::sampler::Sampler;
use crate::scheduler::Clock;
use std::sync::Arc;

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    /// Devices the enumerator asked for
    pub requested: usize,
    /// Devices that made it into the snapshot
    pub sampled: usize,
    /// Value published as the exporter's `up` gauge
    pub up: bool,
    /// Size of the published artifact
    pub bytes: usize,
}

/// One enumerate, sample, encode and publish pass
pub struct Pipeline {
    enumerator: DeviceEnumerator,
    sampler: Sampler,
    publisher: Arc<dyn Publisher>,
}

impl Pipeline {
    pub fn new(
        enumerator: DeviceEnumerator,
        sampler: Sampler,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            enumerator,
            sampler,
            publisher,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.sampler.kind()
    }

    pub fn publisher(&self) -> &dyn Publisher {
        self.publisher.as_ref()
    }

    /// Run one full pass
    ///
    /// Devices that fail to sample are already dropped (and reported) by the
    /// sampler, so the only error left here is a failed publish.
    ///
    /// The `up` gauge is 0 when the listing tool failed or when every
    /// requested device was dropped.
    pub fn run(&self, clock: &dyn Clock) -> Result<CycleSummary, CycleError> {
        let started = clock.now();
        let enumeration = self.enumerator.devices();
        let devices = enumeration.devices;
        let mut snapshot = self.sampler.collect(&devices, started);

        let up = enumeration.detected && (devices.is_empty() || !snapshot.is_empty());
        let elapsed = (clock.now() - started).to_std().unwrap_or_default();
        let names = self.kind().exporter_metrics();
        snapshot.set_exporter_metric(names.up, MetricValue::Int(i64::from(up)));
        snapshot.set_exporter_metric(names.devices, MetricValue::Int(snapshot.len() as i64));
        snapshot.set_exporter_metric(names.duration, MetricValue::Float(elapsed.as_secs_f64()));

        let artifact = encode(&snapshot, self.kind().descriptors());
        self.publisher.publish(&artifact)?;

        Ok(CycleSummary {
            requested: devices.len(),
            sampled: snapshot.len(),
            up,
            bytes: artifact.len(),
        })
    }
}
