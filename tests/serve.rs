//! Serve-mode behaviour over a real listener

use hwmetrics::collectors::{DeviceKind, SampleQuery, SampleSource};
use hwmetrics::encoder::PROMETHEUS_CONTENT_TYPE;
use hwmetrics::enumerator::{DeviceEnumerator, DeviceSelection};
use hwmetrics::error::SampleError;
use hwmetrics::pipeline::Pipeline;
use hwmetrics::publisher::serve::serve;
use hwmetrics::publisher::{LatestArtifact, ServePublisher};
use hwmetrics::reporter::Reporter;
use hwmetrics::sampler::Sampler;
use hwmetrics::scheduler::{Shutdown, SystemClock};
use log::Level;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// One GPU whose temperature rises by one degree per health query
#[derive(Default)]
struct WarmingGpu {
    queries: AtomicU64,
}

impl SampleSource for WarmingGpu {
    fn query(&self, query: &SampleQuery) -> Result<String, SampleError> {
        match query {
            SampleQuery::Listing => Ok("0\n".to_string()),
            SampleQuery::Info(_) => Ok("NVIDIA GeForce RTX 4090, 1324021012345\n".to_string()),
            SampleQuery::Health(_) => {
                let temperature = 40 + self.queries.fetch_add(1, Ordering::SeqCst);
                Ok(format!(
                    "{}, 35, 12, 24564, 1024, 23540, 120.50, 450.00\n",
                    temperature
                ))
            }
            SampleQuery::IoStats(_) => Err(SampleError::ToolUnavailable {
                tool: "nvidia-smi".to_string(),
                reason: "no I/O statistics".to_string(),
            }),
        }
    }
}

struct QuietReporter;

impl Reporter for QuietReporter {
    fn report(&self, _level: Level, _context: &str, _message: &str) {}
}

fn gpu_pipeline(publisher: Arc<ServePublisher>) -> Pipeline {
    let source: Arc<dyn SampleSource> = Arc::new(WarmingGpu::default());
    let reporter: Arc<dyn Reporter> = Arc::new(QuietReporter);
    let enumerator = DeviceEnumerator::new(
        DeviceKind::Gpu,
        DeviceSelection::Auto,
        Arc::clone(&source),
        Arc::clone(&reporter),
    );
    let sampler = Sampler::new(DeviceKind::Gpu, source, reporter);
    Pipeline::new(enumerator, sampler, publisher)
}

async fn start(latest: LatestArtifact, shutdown: &Shutdown) -> (SocketAddr, tokio::task::JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = shutdown.clone();
    let handle = tokio::spawn(serve(listener, latest, async move { shutdown.wait().await }));
    (addr, handle)
}

async fn scrape(addr: SocketAddr) -> (reqwest::StatusCode, String) {
    let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
    let status = response.status();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_scrapes_return_last_cycle_unchanged() {
    let latest = LatestArtifact::new();
    let shutdown = Shutdown::new();
    let (addr, server) = start(latest.clone(), &shutdown).await;
    let publisher = Arc::new(ServePublisher::new(latest, addr));
    let pipeline = gpu_pipeline(publisher);

    let (status, body) = scrape(addr).await;
    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("Error:"));

    pipeline.run(&SystemClock).unwrap();

    let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        PROMETHEUS_CONTENT_TYPE
    );
    let first = response.text().await.unwrap();
    let labels = "device=\"0\",model=\"NVIDIA GeForce RTX 4090\",serial=\"1324021012345\"";
    assert!(first.contains(&format!("nvidia_gpu_temperature_celsius{{{}}} 40.0\n", labels)));
    assert!(first.contains(&format!(
        "nvidia_gpu_memory_total_bytes{{{}}} {}\n",
        labels,
        24564u64 * 1024 * 1024
    )));

    // Scrapes never trigger sampling
    for _ in 0..3 {
        assert_eq!(scrape(addr).await, (reqwest::StatusCode::OK, first.clone()));
    }

    pipeline.run(&SystemClock).unwrap();
    let (_, second) = scrape(addr).await;
    assert!(second.contains(&format!("nvidia_gpu_temperature_celsius{{{}}} 41.0\n", labels)));

    shutdown.trigger();
    server.await.unwrap().unwrap();
}
