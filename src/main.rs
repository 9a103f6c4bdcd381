// Command-line entry point for TraceSift.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use trace_sift::application::{AnalyzeUsecase, VersionInputs, VersionPairReport};
use trace_sift::domain::detector::DetectorConfig;
use trace_sift::domain::matcher::TraceMatcher;
use trace_sift::domain::metrics::ScalingPolicy;
use trace_sift::infrastructure::trace_cache::{DiskTraceCache, TraceCache};
use trace_sift::infrastructure::{
    concurrency, load_scaling_policy, JsonCallGraphImporter, JsonChangeImporter,
    JsonMatchingImporter, JsonReportExporter, JsonTraceImporter,
};
use trace_sift::ports::report_renderer::TextReportExporter;
use trace_sift::ports::ReportExporter;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Version directories in chronological order, oldest first. Each holds
    /// traces/, changes.json, callgraph.json and optional matching.json.
    #[arg(short = 'd', long = "version-dir", required = false)]
    version_dirs: Vec<PathBuf>,

    /// Scaling policy TOML file; defaults apply when omitted.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Output directory for per-pair reports.
    #[arg(short, long, default_value = "reports")]
    output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Compare volatile Class@hash identity strings instead of filtering them.
    #[arg(long)]
    keep_identity_strings: bool,

    /// Which per-pair scalar metrics to compute.
    #[arg(long, value_enum, default_value_t = Metrics::Both)]
    metrics: Metrics,

    /// Persist imported traces across runs in a sled cache at this path.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Worker threads for pairwise comparison; 0 means all cores but one.
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Run as a TCP JSON command server on this port instead of a one-shot
    /// analysis.
    #[arg(long)]
    serve: Option<u16>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Metrics {
    Coverage,
    Distance,
    Both,
    None,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    concurrency::init_thread_pool(cli.workers)?;

    if let Some(port) = cli.serve {
        return trace_sift::api::server::start_server(port);
    }

    if cli.version_dirs.len() < 2 {
        anyhow::bail!("need at least two --version-dir arguments (oldest first)");
    }

    let versions: Vec<VersionInputs> = cli
        .version_dirs
        .iter()
        .map(|dir| VersionInputs::from_version_dir(dir))
        .collect();

    let policy = match &cli.policy {
        Some(path) => load_scaling_policy(path)?,
        None => ScalingPolicy::default(),
    };

    let detector_config = DetectorConfig {
        filter_identity_strings: !cli.keep_identity_strings,
        coverage_metrics: matches!(cli.metrics, Metrics::Coverage | Metrics::Both),
        trace_distance_metrics: matches!(cli.metrics, Metrics::Distance | Metrics::Both),
    };

    let disk_cache: Option<DiskTraceCache> = match &cli.cache_dir {
        Some(dir) => match DiskTraceCache::new(dir) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(error = format!("{e:#}"), "trace cache unavailable; continuing without");
                None
            }
        },
        None => None,
    };

    let usecase = AnalyzeUsecase {
        trace_importer: &JsonTraceImporter,
        change_importer: &JsonChangeImporter,
        callgraph_importer: &JsonCallGraphImporter,
        matching_importer: &JsonMatchingImporter,
        cache: disk_cache.as_ref().map(|c| c as &dyn TraceCache),
        matcher: TraceMatcher::default(),
        detector_config,
        policy,
    };

    let reports = usecase.run(&versions)?;
    if reports.is_empty() {
        anyhow::bail!("no version pair produced a report");
    }

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {}", cli.output.display()))?;
    for report in &reports {
        write_report(&cli, &usecase, report)?;
    }
    println!(
        "Analysis completed: {} version pair(s), reports in {}",
        reports.len(),
        cli.output.display()
    );
    Ok(())
}

fn write_report(cli: &Cli, usecase: &AnalyzeUsecase, report: &VersionPairReport) -> Result<()> {
    let (exporter, extension): (&dyn ReportExporter, &str) = match cli.format {
        Format::Json => (&JsonReportExporter, "json"),
        Format::Text => (&TextReportExporter, "txt"),
    };
    let path = cli
        .output
        .join(format!("report-{}.{}", report.new_version, extension));
    usecase.export_report(exporter, report, &path)?;
    println!(
        "  {} -> {} ({} targets, {} matched / {} unmatched traces)",
        report.old_version,
        report.new_version,
        report.targets.len(),
        report.matched_traces,
        report.unmatched_traces
    );
    Ok(())
}
