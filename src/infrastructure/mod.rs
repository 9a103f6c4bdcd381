// Infrastructure adapters for TraceSift: JSON importers/exporters for the
// exchange formats produced by the instrumentation and differ collaborators.

use crate::domain::callgraph::CallGraph;
use crate::domain::matcher::TraceMatch;
use crate::domain::metrics::ScalingPolicy;
use crate::domain::ranking::TestingTarget;
use crate::domain::syntax_change::{ChangeKind, ChangeSet, SyntaxChange};
use crate::domain::trace::{InvocationKind, ObservedMethod, Trace, TraceEvent, Value};
use crate::ports::{
    CallGraphImporter, ChangeImporter, MatchingImporter, ReportExporter, TraceImporter,
};
use anyhow::{Context, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

pub mod concurrency;
pub mod recorder;
pub mod trace_cache;

// ════════════════════════════════════════════════════════════════════════
// Observed-trace file format
// ════════════════════════════════════════════════════════════════════════

/// On-disk shape of one observed-trace file: an array of root call trees
/// plus optional free-text runtime errors.
#[derive(Debug, Serialize, Deserialize)]
struct TraceFileDto {
    roots: Vec<CallNodeDto>,
    #[serde(default)]
    runtime_errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallNodeDto {
    #[serde(rename = "type")]
    kind: InvocationKind,
    identifier: String,
    #[serde(default)]
    parameters: Vec<Value>,
    /// Ordered mix of raw-instruction markers and nested-call subtrees.
    #[serde(default)]
    trace: Vec<TraceEntryDto>,
    #[serde(default = "not_returned")]
    return_value: Value,
}

fn not_returned() -> Value {
    Value::NotReturned
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TraceEntryDto {
    Instruction { opcode: u16, offset: u32 },
    Call { node: CallNodeDto },
}

impl CallNodeDto {
    fn into_observed(self) -> ObservedMethod {
        let mut method = ObservedMethod::new(self.kind, self.identifier.into(), self.parameters);
        for entry in self.trace {
            match entry {
                TraceEntryDto::Instruction { opcode, offset } => {
                    method.events.push(TraceEvent::Instruction { opcode, offset });
                }
                TraceEntryDto::Call { node } => {
                    method.record_call(node.into_observed());
                }
            }
        }
        method.return_value = self.return_value;
        method
    }
}

/// Reads observed-trace files (`*.json`) from a version's trace directory.
/// Large trace files are memory-mapped before parsing.
pub struct JsonTraceImporter;

impl JsonTraceImporter {
    fn import_file(path: &Path) -> Result<Vec<Trace>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open trace file {}", path.display()))?;
        // Read-only map; the file is not written while we parse it.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap trace file {}", path.display()))?;
        let dto: TraceFileDto = serde_json::from_slice(&mmap)
            .with_context(|| format!("Malformed trace file {}", path.display()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "trace".to_string());

        let multi_root = dto.roots.len() > 1;
        let mut traces = Vec::with_capacity(dto.roots.len());
        for (idx, root) in dto.roots.into_iter().enumerate() {
            let id = if multi_root {
                format!("{}#{}", stem, idx)
            } else {
                stem.clone()
            };
            let mut trace = Trace::new(id, root.into_observed());
            trace.runtime_errors = dto.runtime_errors.clone();
            traces.push(trace);
        }
        Ok(traces)
    }
}

impl TraceImporter for JsonTraceImporter {
    fn import_traces(&self, dir: &Path, version: &str) -> Result<Vec<Trace>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Cannot read trace directory {}", dir.display()))?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut traces = Vec::new();
        for path in paths {
            match Self::import_file(&path) {
                Ok(mut imported) => traces.append(&mut imported),
                // One bad trace file must not abort the version.
                Err(e) => warn!(
                    version,
                    file = %path.display(),
                    error = %e,
                    "skipping malformed trace file"
                ),
            }
        }
        info!(version, count = traces.len(), "imported traces");
        Ok(traces)
    }
}

// ════════════════════════════════════════════════════════════════════════
// Syntax-change and call-graph files
// ════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct ChangeRecordDto {
    kind: ChangeKind,
    #[serde(default)]
    old_code: Option<String>,
    #[serde(default)]
    new_code: Option<String>,
    #[serde(default)]
    method_name: Option<String>,
}

/// Reads a version's syntax-change file: a mapping from unique access
/// string to its change records.
pub struct JsonChangeImporter;

impl ChangeImporter for JsonChangeImporter {
    fn import_changes(&self, path: &Path) -> Result<ChangeSet> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read syntax-change file {}", path.display()))?;
        let raw: HashMap<String, Vec<ChangeRecordDto>> = serde_json::from_str(&content)
            .with_context(|| format!("Malformed syntax-change file {}", path.display()))?;

        let changes = raw
            .into_iter()
            .flat_map(|(access, records)| {
                records.into_iter().map(move |record| SyntaxChange {
                    unique_access: access.clone(),
                    kind: record.kind,
                    old_code: record.old_code,
                    new_code: record.new_code,
                    method_name: record.method_name,
                })
            })
            .collect();
        Ok(ChangeSet::from_changes(changes))
    }
}

/// Reads a version's call-graph file: method identifier -> callee list.
pub struct JsonCallGraphImporter;

impl CallGraphImporter for JsonCallGraphImporter {
    fn import_callgraph(&self, path: &Path) -> Result<CallGraph> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read call-graph file {}", path.display()))?;
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(&content)
            .with_context(|| format!("Malformed call-graph file {}", path.display()))?;

        Ok(CallGraph::from_edges(raw.into_iter().map(
            |(caller, callees)| {
                (
                    caller.into(),
                    callees.into_iter().map(Into::into).collect::<Vec<_>>(),
                )
            },
        )))
    }
}

// ════════════════════════════════════════════════════════════════════════
// Matching file, scaling policy, report export
// ════════════════════════════════════════════════════════════════════════

/// Reads the optional user trace-matching file. Malformed or absent files
/// fall back to default matching with a warning, never a hard failure.
pub struct JsonMatchingImporter;

impl MatchingImporter for JsonMatchingImporter {
    fn import_matching(&self, path: &Path) -> Option<Vec<TraceMatch>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "matching file not readable; using default matching"
                );
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "malformed matching file; using default matching"
                );
                None
            }
        }
    }
}

/// Load a scaling policy from a TOML file.
pub fn load_scaling_policy(path: &Path) -> Result<ScalingPolicy> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read scaling policy {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Malformed scaling policy {}", path.display()))
}

#[derive(Debug, Serialize)]
struct ReportFileDto<'a> {
    version: &'a str,
    targets: &'a [TestingTarget],
}

/// Writes the ranked target list of one version pair as JSON.
pub struct JsonReportExporter;

impl ReportExporter for JsonReportExporter {
    fn export(&self, version: &str, targets: &[TestingTarget], path: &Path) -> Result<()> {
        let dto = ReportFileDto { version, targets };
        let json = serde_json::to_string_pretty(&dto).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE_TRACE: &str = r#"{
        "roots": [{
            "type": "method",
            "identifier": "Main.run()V",
            "parameters": [{"kind": "null"}],
            "trace": [
                {"event": "instruction", "opcode": 42, "offset": 0},
                {"event": "call", "node": {
                    "type": "method",
                    "identifier": "Util.step()I",
                    "trace": [{"event": "instruction", "opcode": 4, "offset": 0}],
                    "return_value": {"kind": "primitive", "type_tag": "I", "repr": "5"}
                }},
                {"event": "instruction", "opcode": 177, "offset": 8}
            ]
        }],
        "runtime_errors": ["java.lang.IllegalStateException in thread-2"]
    }"#;

    #[test]
    fn test_import_trace_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("run1.json"), SAMPLE_TRACE).unwrap();

        let traces = JsonTraceImporter
            .import_traces(dir.path(), "v2")
            .unwrap();
        assert_eq!(traces.len(), 1);

        let trace = &traces[0];
        assert_eq!(trace.id, "run1");
        assert_eq!(trace.entry_identifier().as_str(), "Main.run()V");
        assert_eq!(trace.root.children.len(), 1);
        assert_eq!(trace.root.events.len(), 3);
        assert_eq!(trace.runtime_errors.len(), 1);

        let child = &trace.root.children[0];
        assert_eq!(
            child.return_value,
            Value::Primitive {
                type_tag: "I".to_string(),
                repr: "5".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_trace_file_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("good.json"), SAMPLE_TRACE).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let traces = JsonTraceImporter
            .import_traces(dir.path(), "v2")
            .unwrap();
        // The bad file is skipped, the good one survives.
        assert_eq!(traces.len(), 1);
    }

    #[test]
    fn test_missing_trace_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = JsonTraceImporter.import_traces(&missing, "v2");
        assert!(result.is_err());
    }

    #[test]
    fn test_import_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.json");
        std::fs::write(
            &path,
            r#"{
                "Util.calc": [{"kind": "modification", "old_code": "a", "new_code": "b"}],
                "com.example.Fresh": [{"kind": "new_class"}]
            }"#,
        )
        .unwrap();

        let changes = JsonChangeImporter.import_changes(&path).unwrap();
        assert_eq!(changes.changes_for("Util.calc").len(), 1);
        assert_eq!(
            changes.changes_for("com.example.Fresh")[0].kind,
            ChangeKind::NewClass
        );
    }

    #[test]
    fn test_import_callgraph() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("callgraph.json");
        std::fs::write(&path, r#"{"A.a()V": ["B.b()V", "C.c()V"], "B.b()V": []}"#).unwrap();

        let graph = JsonCallGraphImporter.import_callgraph(&path).unwrap();
        assert_eq!(
            graph.distance_to_caller(&"A.a()V".into(), &"C.c()V".into()),
            Some(1)
        );
    }

    #[test]
    fn test_malformed_matching_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matching.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(JsonMatchingImporter.import_matching(&path).is_none());

        std::fs::write(
            &path,
            r#"[{"traceInThis": "new-1", "matchTo": "old-1"}]"#,
        )
        .unwrap();
        let mapping = JsonMatchingImporter.import_matching(&path).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].trace_in_this, "new-1");
    }

    #[test]
    fn test_scaling_policy_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(
            &path,
            "distance_weight = 2.0\n\n[non_local]\ncoverage = 0.1\n",
        )
        .unwrap();

        let policy = load_scaling_policy(&path).unwrap();
        assert_eq!(policy.distance_weight, 2.0);
        assert_eq!(policy.non_local.coverage, 0.1);
        // Unspecified fields keep their defaults.
        assert_eq!(policy.local, ScalingPolicy::default().local);
    }
}
