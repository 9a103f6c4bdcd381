use crate::application::{AnalyzeUsecase, VersionInputs};
use crate::domain::detector::DetectorConfig;
use crate::domain::matcher::TraceMatcher;
use crate::domain::metrics::ScalingPolicy;
use crate::infrastructure::{
    load_scaling_policy, JsonCallGraphImporter, JsonChangeImporter, JsonMatchingImporter,
    JsonTraceImporter,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct CommandReq {
    command: String,
    params: Option<serde_json::Value>,
}

pub fn start_server(port: u16) -> Result<()> {
    let address = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&address)
        .with_context(|| format!("Failed to bind to {}", address))?;

    info!(%address, "API server listening");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream) {
                        error!(error = %e, "connection error");
                    }
                });
            }
            Err(e) => error!(error = %e, "accept error"),
        }
    }

    Ok(())
}

fn handle_connection(mut stream: TcpStream) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break; // Connection closed
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match process_command(trimmed) {
            Ok(data) => json!({
                "status": "success",
                "data": data
            }),
            Err(e) => json!({
                "status": "error",
                "message": format!("{e:#}")
            }),
        };

        let response_str = serde_json::to_string(&response)?;
        stream.write_all(response_str.as_bytes())?;
        stream.write_all(b"\n")?;

        if let Ok(req) = serde_json::from_str::<CommandReq>(trimmed) {
            if req.command == "SHUTDOWN" {
                info!("shutdown requested");
                std::process::exit(0);
            }
        }
    }
    Ok(())
}

fn process_command(json_str: &str) -> Result<serde_json::Value> {
    let req: CommandReq = serde_json::from_str(json_str).context("Invalid JSON format")?;

    match req.command.as_str() {
        "PING" => Ok(json!("PONG")),
        "ANALYZE" => handle_analyze(req.params),
        "SHUTDOWN" => Ok(json!("Shutting down...")),
        _ => anyhow::bail!("Unknown command: {}", req.command),
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    /// Version directories in chronological order, each laid out as
    /// `traces/`, `changes.json`, `callgraph.json`, optional `matching.json`.
    versions: Vec<PathBuf>,
    policy: Option<PathBuf>,
}

fn handle_analyze(params: Option<serde_json::Value>) -> Result<serde_json::Value> {
    let params = params.ok_or_else(|| anyhow::anyhow!("Missing params for ANALYZE"))?;
    let params: AnalyzeParams =
        serde_json::from_value(params).context("Invalid ANALYZE params")?;

    for dir in &params.versions {
        if !dir.exists() {
            anyhow::bail!("Version directory not found: {}", dir.display());
        }
    }
    let versions: Vec<VersionInputs> = params
        .versions
        .iter()
        .map(|dir| VersionInputs::from_version_dir(dir))
        .collect();

    let policy = match &params.policy {
        Some(path) => load_scaling_policy(path)?,
        None => ScalingPolicy::default(),
    };

    info!(versions = versions.len(), "analyzing version sequence");

    let usecase = AnalyzeUsecase {
        trace_importer: &JsonTraceImporter,
        change_importer: &JsonChangeImporter,
        callgraph_importer: &JsonCallGraphImporter,
        matching_importer: &JsonMatchingImporter,
        cache: None,
        matcher: TraceMatcher::default(),
        detector_config: DetectorConfig::default(),
        policy,
    };
    let reports = usecase.run(&versions)?;

    let dtos: Vec<crate::api::dto::ReportDto> =
        reports.iter().map(Into::into).collect();
    Ok(serde_json::to_value(dtos)?)
}
