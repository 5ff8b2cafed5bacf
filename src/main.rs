use anyhow::{bail, Context};
use clap::Parser;
use hwmetrics::collectors::{CommandRunner, DeviceKind, NvidiaSmiSource, NvmeSource, SampleSource};
use hwmetrics::config::{Config, PublishMode};
use hwmetrics::enumerator::DeviceEnumerator;
use hwmetrics::pipeline::Pipeline;
use hwmetrics::publisher::serve::serve;
use hwmetrics::publisher::{FilePublisher, LatestArtifact, Publisher, ServePublisher};
use hwmetrics::reporter::{LogReporter, Reporter};
use hwmetrics::sampler::Sampler;
use hwmetrics::scheduler::{Scheduler, Shutdown, SystemClock};
use log::{error, info, warn, LevelFilter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;

/// Command-line arguments for the hardware metrics exporter
#[derive(Parser, Debug)]
#[command(
    name = "hwmetrics",
    version,
    about = "Prometheus exporter for NVMe SMART health and NVIDIA GPU telemetry",
    long_about = "Periodically samples NVMe drives (via nvme-cli and /proc/diskstats) or NVIDIA \
                  GPUs (via nvidia-smi) and publishes the readings in Prometheus text format, \
                  either as a textfile-collector file or over HTTP."
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", help = "Configuration file path (TOML format)")]
    config: Option<PathBuf>,

    /// Hardware family to sample
    #[arg(short, long, value_enum)]
    exporter: Option<DeviceKind>,

    /// Where to publish (defaults to file for nvme, serve for gpu)
    #[arg(short, long, value_enum)]
    mode: Option<PublishMode>,

    /// Directory for the .prom file in file mode
    #[arg(long, env = "METRICS_DIR", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// File name inside the output directory
    #[arg(long, value_name = "NAME")]
    output_file: Option<String>,

    /// Seconds between the end of one cycle and the start of the next
    #[arg(short, long, env = "METRICS_UPDATE_INTERVAL", value_name = "SECS")]
    interval: Option<u64>,

    /// Interval under its older NVMe-only environment name
    #[arg(long = "nvme-update-interval", env = "NVME_UPDATE_INTERVAL", hide = true)]
    legacy_interval: Option<u64>,

    /// `auto` or a comma-separated list such as `nvme0,nvme1`
    #[arg(short, long, value_delimiter = ',', value_name = "LIST")]
    devices: Option<Vec<String>>,

    /// Listen address in serve mode
    #[arg(long, env = "METRICS_LISTEN", value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Per-command timeout in seconds (1-10)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Run a single cycle and exit with its status
    #[arg(long)]
    once: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging output (debug level)")]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in Config::load
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Layer flags and environment variables over the loaded configuration
    fn apply(&self, config: &mut Config) {
        if let Some(exporter) = self.exporter {
            config.exporter = exporter;
        }
        if let Some(mode) = self.mode {
            config.mode = Some(mode);
        }
        if let Some(ref dir) = self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(ref name) = self.output_file {
            config.output_file = Some(name.clone());
        }
        if let Some(interval) = self.interval.or(self.legacy_interval) {
            config.interval_seconds = interval;
        }
        if let Some(ref devices) = self.devices {
            config.devices = devices
                .iter()
                .map(|d| d.trim().to_string())
                .collect();
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

fn build_source(config: &Config) -> Arc<dyn SampleSource> {
    let runner = CommandRunner::new(config.timeout());
    match config.exporter {
        DeviceKind::Nvme => Arc::new(NvmeSource::new(runner, config.diskstats_path.clone())),
        DeviceKind::Gpu => Arc::new(NvidiaSmiSource::new(runner)),
    }
}

fn build_scheduler(
    config: &Config,
    publisher: Arc<dyn Publisher>,
    reporter: Arc<dyn Reporter>,
) -> Scheduler {
    let source = build_source(config);
    let enumerator = DeviceEnumerator::new(
        config.exporter,
        config.device_selection(),
        Arc::clone(&source),
        Arc::clone(&reporter),
    );
    let sampler = Sampler::new(config.exporter, source, Arc::clone(&reporter));
    let pipeline = Pipeline::new(enumerator, sampler, publisher);
    Scheduler::new(pipeline, config.interval(), Arc::new(SystemClock), reporter)
}

/// Route SIGINT and SIGTERM to the shutdown signal
fn install_signal_handler(shutdown: &Shutdown) -> anyhow::Result<()> {
    let shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received termination signal, shutting down gracefully...");
        shutdown.trigger();
    })
    .context("Error setting signal handler for graceful shutdown")
}

fn run_file_mode(config: &Config, once: bool, reporter: Arc<dyn Reporter>) -> anyhow::Result<bool> {
    let publisher = Arc::new(FilePublisher::new(config.output_path()));
    publisher.prepare().with_context(|| {
        format!(
            "Failed to create output directory for {}",
            publisher.target().display()
        )
    })?;

    let mut scheduler = build_scheduler(config, publisher, reporter);
    if once {
        return Ok(matches!(scheduler.tick(), Ok(summary) if summary.up));
    }

    let shutdown = Shutdown::new();
    install_signal_handler(&shutdown)?;
    info!("Exporter is running. Press Ctrl+C to stop.");
    scheduler.run(&shutdown);
    Ok(true)
}

fn run_serve_mode(config: &Config, once: bool, reporter: Arc<dyn Reporter>) -> anyhow::Result<bool> {
    if once {
        bail!("--once only applies to file mode; serve mode keeps nothing after exit");
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let listener = runtime
        .block_on(TcpListener::bind(config.listen))
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    let latest = LatestArtifact::new();
    let publisher = Arc::new(ServePublisher::new(latest.clone(), config.listen));
    let mut scheduler = build_scheduler(config, publisher.clone(), reporter);

    let shutdown = Shutdown::new();
    install_signal_handler(&shutdown)?;

    let sampling = {
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || scheduler.run(&shutdown))
            .context("Failed to spawn sampling thread")?
    };

    info!("Serving metrics on {}", publisher.destination());
    let served = runtime.block_on(serve(listener, latest, {
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    }));

    // The server may also stop on its own error; make sure sampling follows
    shutdown.trigger();
    if sampling.join().is_err() {
        error!("Sampling thread panicked");
    }

    served.context("HTTP server failed")?;
    Ok(true)
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        "Exporter {} in {:?} mode, interval {}s, devices {:?}",
        config.exporter,
        config.publish_mode(),
        config.interval_seconds,
        config.device_selection()
    );

    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter);
    match config.publish_mode() {
        PublishMode::File => run_file_mode(&config, cli.once, reporter),
        PublishMode::Serve => run_serve_mode(&config, cli.once, reporter),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("Starting hwmetrics exporter");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    match run(&cli) {
        Ok(true) => info!("hwmetrics shutdown complete"),
        Ok(false) => {
            error!("Cycle failed");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
