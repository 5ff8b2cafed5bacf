use crate::collectors::{DeviceKind, SampleQuery, SampleSource};
use crate::reporter::Reporter;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which devices to sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Ask the listing tool on every cycle
    Auto,
    /// Sample exactly these devices
    Fixed(Vec<String>),
}

/// Result of one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    /// Deduplicated device ids in lexicographic order
    pub devices: Vec<String>,
    /// False when the listing tool failed or printed something unparsable
    pub detected: bool,
}

/// Produces the ordered device list for one cycle
///
/// Enumeration never fails: when the listing tool is missing, hangs or prints
/// something unexpected, the cycle simply has nothing to sample.
pub struct DeviceEnumerator {
    kind: DeviceKind,
    selection: DeviceSelection,
    source: Arc<dyn SampleSource>,
    reporter: Arc<dyn Reporter>,
}

impl DeviceEnumerator {
    pub fn new(
        kind: DeviceKind,
        selection: DeviceSelection,
        source: Arc<dyn SampleSource>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            kind,
            selection,
            source,
            reporter,
        }
    }

    /// Devices to sample this cycle
    ///
    /// A failed listing yields an empty list with `detected` unset rather
    /// than an error.
    pub fn devices(&self) -> Enumeration {
        let (found, detected) = match &self.selection {
            DeviceSelection::Fixed(devices) => (devices.clone(), true),
            DeviceSelection::Auto => match self.detect() {
                Some(devices) => (devices, true),
                None => (Vec::new(), false),
            },
        };

        let devices: Vec<String> = found.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if devices.is_empty() {
            self.reporter
                .warn(&self.kind.to_string(), "No devices found to sample");
        } else {
            self.reporter.debug(
                &self.kind.to_string(),
                &format!("Sampling devices: {}", devices.join(", ")),
            );
        }
        Enumeration { devices, detected }
    }

    fn detect(&self) -> Option<Vec<String>> {
        let context = format!("{} listing", self.kind);
        let raw = match self.source.query(&SampleQuery::Listing) {
            Ok(raw) => raw,
            Err(e) => {
                self.reporter
                    .warn(&context, &format!("Device detection failed: {}", e));
                return None;
            }
        };

        match self.kind.parse_listing(&raw) {
            Ok(devices) => Some(devices),
            Err(e) => {
                self.reporter
                    .warn(&context, &format!("Device detection failed: {}", e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::source::MockSampleSource;
    use crate::error::SampleError;
    use crate::reporter::testing::RecordingReporter;
    use std::time::Duration;

    fn enumerator(
        kind: DeviceKind,
        selection: DeviceSelection,
        source: MockSampleSource,
    ) -> (DeviceEnumerator, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let enumerator =
            DeviceEnumerator::new(kind, selection, Arc::new(source), reporter.clone());
        (enumerator, reporter)
    }

    #[test]
    fn test_fixed_list_is_sorted_and_deduplicated() {
        let mut source = MockSampleSource::new();
        source.expect_query().never();

        let (enumerator, _) = enumerator(
            DeviceKind::Nvme,
            DeviceSelection::Fixed(vec![
                "nvme3".to_string(),
                "nvme0".to_string(),
                "nvme3".to_string(),
            ]),
            source,
        );
        let enumeration = enumerator.devices();
        assert_eq!(enumeration.devices, vec!["nvme0", "nvme3"]);
        assert!(enumeration.detected);
    }

    #[test]
    fn test_auto_detects_from_listing() {
        let mut source = MockSampleSource::new();
        source
            .expect_query()
            .withf(|q| *q == SampleQuery::Listing)
            .times(1)
            .returning(|_| {
                Ok(r#"{"Devices":[{"DevicePath":"/dev/nvme1n1"},{"DevicePath":"/dev/nvme0n1"},{"DevicePath":"/dev/nvme0n2"}]}"#.to_string())
            });

        let (enumerator, _) = enumerator(DeviceKind::Nvme, DeviceSelection::Auto, source);
        let enumeration = enumerator.devices();
        assert_eq!(enumeration.devices, vec!["nvme0", "nvme1"]);
        assert!(enumeration.detected);
    }

    #[test]
    fn test_auto_timeout_fails_soft() {
        let mut source = MockSampleSource::new();
        source.expect_query().returning(|_| {
            Err(SampleError::ToolTimeout {
                tool: "nvme list -o json".to_string(),
                timeout: Duration::from_secs(10),
            })
        });

        let (enumerator, reporter) = enumerator(DeviceKind::Nvme, DeviceSelection::Auto, source);
        let enumeration = enumerator.devices();
        assert!(enumeration.devices.is_empty());
        assert!(!enumeration.detected);
        assert!(reporter.warned_about("timed out"));
    }

    #[test]
    fn test_auto_unparsable_output_fails_soft() {
        let mut source = MockSampleSource::new();
        source
            .expect_query()
            .returning(|_| Ok("Failed to initialize NVML".to_string()));

        let (enumerator, reporter) = enumerator(DeviceKind::Gpu, DeviceSelection::Auto, source);
        let enumeration = enumerator.devices();
        assert!(enumeration.devices.is_empty());
        assert!(!enumeration.detected);
        assert!(reporter.warned_about("gpu listing"));
    }

    #[test]
    fn test_gpu_indexes_sort_lexicographically() {
        let mut source = MockSampleSource::new();
        source
            .expect_query()
            .returning(|_| Ok("2\n0\n10\n1\n".to_string()));

        let (enumerator, _) = enumerator(DeviceKind::Gpu, DeviceSelection::Auto, source);
        assert_eq!(enumerator.devices().devices, vec!["0", "1", "10", "2"]);
    }

    #[test]
    fn test_empty_listing_counts_as_detected() {
        let mut source = MockSampleSource::new();
        source
            .expect_query()
            .returning(|_| Ok(r#"{"Devices": []}"#.to_string()));

        let (enumerator, reporter) = enumerator(DeviceKind::Nvme, DeviceSelection::Auto, source);
        let enumeration = enumerator.devices();
        assert!(enumeration.devices.is_empty());
        assert!(enumeration.detected);
        assert!(reporter.warned_about("No devices found"));
    }
}
