use anyhow::Context;
use clap::Parser;
use minefusion::interface::Device;
use minefusion::FusionService;
use server::bridge::DeviceGateway;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;
use workflow::config::GatewayConfig;
use workflow::runner::{Runner, SurveySummary};

mod generator;
mod server;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Device-stream gateway for buried-object survey fusion")]
struct Args {
    /// Run one synthetic survey end to end and print a summary
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a gateway config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: String,
    /// H3 resolution of the fusion grid
    #[arg(long, default_value_t = 12)]
    resolution: u8,
    #[arg(long, default_value_t = 300)]
    bucket_seconds: u64,
    /// Minimum probability for a cell to become a detection
    #[arg(long, default_value_t = 0.7)]
    threshold: f64,
    /// Accept device streams and serve queries until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// Devices to register before serving, as type:serial
    #[arg(long = "device")]
    devices: Vec<String>,
}

fn summary_line(summary: &SurveySummary) -> String {
    format!(
        "scan={} frames={} readings={} detections={} rerun_skipped={} dropped={} rejected={}\n",
        summary.scan_id,
        summary.frames_sent,
        summary.readings_stored,
        summary.detections.len(),
        summary.rerun_skipped,
        summary.metrics.frames_dropped,
        summary.metrics.frames_rejected
    )
}

fn append_report(path: &Path, line: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening report {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = if let Some(path) = args.config {
        GatewayConfig::load(path)?
    } else {
        GatewayConfig::from_args(&args.bind, args.resolution, args.bucket_seconds, args.threshold)
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating gateway runtime")?;

    if args.offline {
        let runner = Runner::new(&config)?;
        let summary = runtime.block_on(runner.execute())?;
        println!(
            "Offline survey -> {} frames, {} readings, {} detections",
            summary.frames_sent,
            summary.readings_stored,
            summary.detections.len()
        );
        for (sensor, buckets) in &summary.report.rollups {
            println!("  {}: {} bucket(s)", sensor, buckets.len());
        }
        for detection in &summary.detections {
            println!(
                "  {} {:?} p={:.3} danger={} at ({:.6}, {:.6})",
                detection.id,
                detection.object_type,
                detection.confidence,
                detection.danger_level.get(),
                detection.latitude,
                detection.longitude
            );
        }
        if let Some(path) = config.report_path.as_ref() {
            append_report(path, &summary_line(&summary))?;
        }
    }

    if args.serve {
        let addr: SocketAddr = config
            .bind
            .parse()
            .with_context(|| format!("parsing bind address {}", config.bind))?;
        let (service, store) =
            FusionService::in_memory(config.pipeline.clone()).context("building fusion service")?;
        for entry in &args.devices {
            let (device_type, serial) = entry
                .split_once(':')
                .with_context(|| format!("device '{}' is not type:serial", entry))?;
            let device = Device::register(device_type, serial, chrono::Utc::now());
            println!("registered device {} ({} {})", device.id, device_type, serial);
            store.insert_device(device);
        }
        let gateway = DeviceGateway::new(Arc::new(service));
        runtime.block_on(gateway.serve(addr))?;
    }

    Ok(())
}
