use crate::collectors::{DeviceKind, SampleQuery, SampleSource};
use crate::error::SampleError;
use crate::records::{DeviceRecord, MetricMap, Snapshot};
use crate::reporter::Reporter;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Turns device ids into complete [`DeviceRecord`]s
///
/// Info and health queries are mandatory: if either fails the device is left
/// out of the cycle. The I/O statistics query is optional and only removes its
/// own metrics when it fails.
pub struct Sampler {
    kind: DeviceKind,
    source: Arc<dyn SampleSource>,
    reporter: Arc<dyn Reporter>,
}

impl Sampler {
    pub fn new(kind: DeviceKind, source: Arc<dyn SampleSource>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            kind,
            source,
            reporter,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Sample one device
    ///
    /// # Errors
    ///
    /// Returns `SampleError::PartialDevice` when a mandatory query fails.
    pub fn sample(&self, device: &str) -> Result<DeviceRecord, SampleError> {
        let info = SampleQuery::Info(device.to_string());
        let identity = self
            .mandatory(&info)
            .and_then(|raw| self.kind.parse_info(device, &raw))
            .map_err(|e| partial(device, &info, e))?;

        let health = SampleQuery::Health(device.to_string());
        let mut metrics = self
            .mandatory(&health)
            .and_then(|raw| self.kind.parse_health(device, &raw))
            .map_err(|e| partial(device, &health, e))?;

        if self.kind.collects_io_stats() {
            if let Some(io_stats) = self.io_stats(device) {
                metrics.extend(io_stats);
            }
        }

        Ok(DeviceRecord::new(device, identity, metrics))
    }

    /// Sample every device, leaving out the ones that fail
    pub fn collect(&self, devices: &[String], taken_at: DateTime<Utc>) -> Snapshot {
        let mut snapshot = Snapshot::new(taken_at);
        for device in devices {
            self.reporter
                .debug(device, &format!("Collecting {} metrics", self.kind));
            match self.sample(device) {
                Ok(record) => snapshot.insert(record),
                Err(e) => self.reporter.warn(device, &e.to_string()),
            }
        }
        snapshot
    }

    fn mandatory(&self, query: &SampleQuery) -> Result<String, SampleError> {
        self.source.query(query)
    }

    fn io_stats(&self, device: &str) -> Option<MetricMap> {
        let query = SampleQuery::IoStats(device.to_string());
        let parsed = self
            .source
            .query(&query)
            .and_then(|raw| self.kind.parse_io_stats(device, &raw));

        match parsed {
            Ok(Some(metrics)) => Some(metrics),
            Ok(None) => {
                self.reporter
                    .debug(device, "No I/O statistics entry for device");
                None
            }
            Err(e) => {
                self.reporter
                    .warn(device, &format!("{} query failed: {}", query, e));
                None
            }
        }
    }
}

fn partial(device: &str, query: &SampleQuery, source: SampleError) -> SampleError {
    SampleError::PartialDevice {
        device: device.to_string(),
        query: query.kind().to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::nvme;
    use crate::collectors::source::MockSampleSource;
    use crate::records::MetricValue;
    use crate::reporter::testing::RecordingReporter;

    const ID_CTRL: &str = r#"{"mn": "Samsung SSD 990 PRO 2TB", "sn": "S73WNJ0W1", "fr": "4B2QJXD7"}"#;
    const SMART_LOG: &str = r#"{"temperature": 300, "available_spare": 100, "media_errors": 0}"#;
    const DISKSTATS: &str =
        " 259 0 nvme0n1 10 0 80 1 20 0 160 2 1 3 3 0 0 0 0\n 259 1 nvme1n1 5 0 40 1 6 0 48 2 0 3 3 0 0 0 0\n";

    fn sampler(source: MockSampleSource) -> (Sampler, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let sampler = Sampler::new(DeviceKind::Nvme, Arc::new(source), reporter.clone());
        (sampler, reporter)
    }

    #[test]
    fn test_full_record() {
        let mut source = MockSampleSource::new();
        source.expect_query().returning(|q| match q {
            SampleQuery::Info(_) => Ok(ID_CTRL.to_string()),
            SampleQuery::Health(_) => Ok(SMART_LOG.to_string()),
            SampleQuery::IoStats(_) => Ok(DISKSTATS.to_string()),
            SampleQuery::Listing => unreachable!(),
        });

        let (sampler, _) = sampler(source);
        let record = sampler.sample("nvme0").unwrap();

        assert_eq!(record.model(), "Samsung SSD 990 PRO 2TB");
        assert_eq!(record.serial(), "S73WNJ0W1");
        assert_eq!(record.metric(nvme::TEMPERATURE), Some(MetricValue::Int(27)));
        assert_eq!(record.metric(nvme::IO_IN_PROGRESS), Some(MetricValue::Int(1)));
    }

    #[test]
    fn test_info_failure_drops_device() {
        let mut source = MockSampleSource::new();
        source
            .expect_query()
            .withf(|q| matches!(q, SampleQuery::Info(_)))
            .returning(|_| Err(SampleError::unavailable("nvme id-ctrl", "exit status: 1")));
        source
            .expect_query()
            .withf(|q| matches!(q, SampleQuery::Health(_)))
            .never();

        let (sampler, _) = sampler(source);
        match sampler.sample("nvme1") {
            Err(SampleError::PartialDevice { device, query, .. }) => {
                assert_eq!(device, "nvme1");
                assert_eq!(query, "info");
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_health_parse_failure_drops_device() {
        let mut source = MockSampleSource::new();
        source.expect_query().returning(|q| match q {
            SampleQuery::Info(_) => Ok(ID_CTRL.to_string()),
            _ => Ok("<html>not json</html>".to_string()),
        });

        let (sampler, _) = sampler(source);
        let err = sampler.sample("nvme0").unwrap_err();
        assert!(err.to_string().contains("health"));
    }

    #[test]
    fn test_io_stats_failure_keeps_device() {
        let mut source = MockSampleSource::new();
        source.expect_query().returning(|q| match q {
            SampleQuery::Info(_) => Ok(ID_CTRL.to_string()),
            SampleQuery::Health(_) => Ok(SMART_LOG.to_string()),
            _ => Err(SampleError::unavailable("/proc/diskstats", "permission denied")),
        });

        let (sampler, reporter) = sampler(source);
        let record = sampler.sample("nvme0").unwrap();

        assert_eq!(record.metric(nvme::IO_IN_PROGRESS), None);
        assert_eq!(record.metric(nvme::TEMPERATURE), Some(MetricValue::Int(27)));
        assert!(reporter.warned_about("diskstats"));
    }

    #[test]
    fn test_gpu_never_queries_io_stats() {
        let mut source = MockSampleSource::new();
        source
            .expect_query()
            .withf(|q| matches!(q, SampleQuery::IoStats(_)))
            .never();
        source.expect_query().returning(|q| match q {
            SampleQuery::Info(_) => Ok("NVIDIA RTX A4000, 1320000000001".to_string()),
            _ => Ok("41, 5, 1, 16376, 300, 16076, 20.5, 140.0".to_string()),
        });

        let reporter = Arc::new(RecordingReporter::new());
        let sampler = Sampler::new(DeviceKind::Gpu, Arc::new(source), reporter);
        let record = sampler.sample("0").unwrap();
        assert_eq!(record.model(), "NVIDIA RTX A4000");
    }

    #[test]
    fn test_collect_skips_failed_devices_and_warns() {
        let mut source = MockSampleSource::new();
        source.expect_query().returning(|q| match q {
            SampleQuery::Info(d) if d == "dev1" => {
                Err(SampleError::unavailable("nvme id-ctrl /dev/dev1", "exit status: 1"))
            }
            SampleQuery::Info(_) => Ok(ID_CTRL.to_string()),
            SampleQuery::Health(_) => Ok(SMART_LOG.to_string()),
            _ => Ok(String::new()),
        });

        let (sampler, reporter) = sampler(source);
        let snapshot = sampler.collect(&["dev0".to_string(), "dev1".to_string()], Utc::now());

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.device("dev0").is_some());
        assert!(snapshot.device("dev1").is_none());
        assert!(reporter.warned_about("dev1"));
    }
}
