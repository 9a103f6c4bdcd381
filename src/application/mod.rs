//! Analysis pipeline: import two versions, match their traces, detect
//! divergences pair by pair, then aggregate and rank testing targets.

use crate::domain::detector::{DetectorConfig, DivergenceDetector};
use crate::domain::matcher::TraceMatcher;
use crate::domain::method_data::MethodDataTree;
use crate::domain::metrics::ScalingPolicy;
use crate::domain::ranking::{Comparison, MetricAggregator, TestingTarget};
use crate::domain::syntax_change::ChangeSet;
use crate::domain::trace::Trace;
use crate::infrastructure::trace_cache::{directory_fingerprint, TraceCache};
use crate::ports::{
    CallGraphImporter, ChangeImporter, MatchingImporter, ReportExporter, TraceImporter,
};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Input locations for one program version.
#[derive(Debug, Clone)]
pub struct VersionInputs {
    pub name: String,
    pub trace_dir: PathBuf,
    /// Syntax changes relative to the previous version.
    pub changes_path: PathBuf,
    pub callgraph_path: PathBuf,
    /// Optional user-provided trace matching override.
    pub matching_path: Option<PathBuf>,
}

impl VersionInputs {
    /// Conventional layout inside one version directory: `traces/`,
    /// `changes.json`, `callgraph.json` and optional `matching.json`.
    pub fn from_version_dir(dir: &Path) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| dir.display().to_string());
        let matching = dir.join("matching.json");
        Self {
            name,
            trace_dir: dir.join("traces"),
            changes_path: dir.join("changes.json"),
            callgraph_path: dir.join("callgraph.json"),
            matching_path: matching.exists().then_some(matching),
        }
    }
}

/// Outcome of comparing one adjacent version pair.
#[derive(Debug)]
pub struct VersionPairReport {
    pub old_version: String,
    pub new_version: String,
    pub matched_traces: usize,
    pub unmatched_traces: usize,
    pub targets: Vec<TestingTarget>,
}

pub struct AnalyzeUsecase<'a> {
    pub trace_importer: &'a dyn TraceImporter,
    pub change_importer: &'a dyn ChangeImporter,
    pub callgraph_importer: &'a dyn CallGraphImporter,
    pub matching_importer: &'a dyn MatchingImporter,
    pub cache: Option<&'a dyn TraceCache>,
    pub matcher: TraceMatcher,
    pub detector_config: DetectorConfig,
    pub policy: ScalingPolicy,
}

impl<'a> AnalyzeUsecase<'a> {
    /// Analyze every adjacent version pair in order. A failing pair is
    /// reported and skipped; the run continues with the next pair.
    pub fn run(&self, versions: &[VersionInputs]) -> Result<Vec<VersionPairReport>> {
        if versions.len() < 2 {
            bail!("analysis needs at least two versions, got {}", versions.len());
        }

        let mut reports = Vec::new();
        for pair in versions.windows(2) {
            let (old, new) = (&pair[0], &pair[1]);
            match self.analyze_pair(old, new) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(
                    old = old.name,
                    new = new.name,
                    error = format!("{e:#}"),
                    "skipping version pair"
                ),
            }
        }
        Ok(reports)
    }

    pub fn analyze_pair(
        &self,
        old: &VersionInputs,
        new: &VersionInputs,
    ) -> Result<VersionPairReport> {
        let old_traces = self.load_traces(old)?;
        let new_traces = self.load_traces(new)?;

        let changes = self
            .change_importer
            .import_changes(&new.changes_path)
            .with_context(|| format!("importing changes for {}", new.name))?;
        let callgraph = self
            .callgraph_importer
            .import_callgraph(&new.callgraph_path)
            .with_context(|| format!("importing call graph for {}", new.name))?;

        let assignment = self.match_traces(new, &old_traces, &new_traces);
        let matched: Vec<(usize, usize)> = assignment
            .iter()
            .enumerate()
            .filter_map(|(new_idx, old_idx)| old_idx.map(|o| (o, new_idx)))
            .collect();
        let unmatched = new_traces.len() - matched.len();
        info!(
            old = old.name,
            new = new.name,
            matched = matched.len(),
            unmatched,
            "matched traces"
        );

        // Old-side trees carry no change markers; the imported change set
        // describes the old -> new edit and belongs to the new side.
        let no_changes = ChangeSet::new();
        let detector = DivergenceDetector::new(self.detector_config.clone());
        let comparisons: Vec<Comparison> = matched
            .par_iter()
            .map(|&(old_idx, new_idx)| {
                let old_tree = MethodDataTree::from_trace(&old_traces[old_idx], &no_changes);
                let new_tree = MethodDataTree::from_trace(&new_traces[new_idx], &changes);
                let divergences = detector.compare(&old_tree, &new_tree);
                Comparison {
                    tree: new_tree,
                    divergences,
                }
            })
            .collect();

        let aggregator = MetricAggregator::new(&self.policy, &callgraph, &changes);
        let targets = aggregator.aggregate(&comparisons);

        Ok(VersionPairReport {
            old_version: old.name.clone(),
            new_version: new.name.clone(),
            matched_traces: matched.len(),
            unmatched_traces: unmatched,
            targets,
        })
    }

    /// Export one pair's report through the given exporter.
    pub fn export_report(
        &self,
        exporter: &dyn ReportExporter,
        report: &VersionPairReport,
        path: &Path,
    ) -> Result<()> {
        exporter.export(&report.new_version, &report.targets, path)
    }

    fn load_traces(&self, version: &VersionInputs) -> Result<Vec<Trace>> {
        let fingerprint = match self.cache {
            Some(_) => directory_fingerprint(&version.trace_dir).ok(),
            None => None,
        };
        if let (Some(cache), Some(fp)) = (self.cache, fingerprint.as_deref()) {
            if let Some(traces) = cache.get(&version.name, fp) {
                info!(version = version.name, count = traces.len(), "trace cache hit");
                return Ok(traces);
            }
        }

        let traces = self
            .trace_importer
            .import_traces(&version.trace_dir, &version.name)
            .with_context(|| format!("importing traces for {}", version.name))?;
        if traces.is_empty() {
            bail!("no usable traces for version {}", version.name);
        }

        if let (Some(cache), Some(fp)) = (self.cache, fingerprint.as_deref()) {
            cache.insert(&version.name, fp, &traces);
        }
        Ok(traces)
    }

    /// Pick the old-trace index for every new trace, preferring the user
    /// matching file when the new version carries one.
    fn match_traces(
        &self,
        new: &VersionInputs,
        old_traces: &[Trace],
        new_traces: &[Trace],
    ) -> Vec<Option<usize>> {
        if let Some(path) = &new.matching_path {
            if let Some(mapping) = self.matching_importer.import_matching(path) {
                let new_ids: Vec<String> = new_traces.iter().map(|t| t.id.clone()).collect();
                let old_ids: Vec<String> = old_traces.iter().map(|t| t.id.clone()).collect();
                return self.matcher.match_with_mapping(&mapping, &new_ids, &old_ids);
            }
        }
        let new_entries: Vec<String> = new_traces
            .iter()
            .map(|t| t.entry_identifier().as_str().to_string())
            .collect();
        let old_entries: Vec<String> = old_traces
            .iter()
            .map(|t| t.entry_identifier().as_str().to_string())
            .collect();
        self.matcher.match_by_entry_points(&new_entries, &old_entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{
        JsonCallGraphImporter, JsonChangeImporter, JsonMatchingImporter, JsonTraceImporter,
    };
    use tempfile::tempdir;

    fn trace_json(identifier: &str, opcode: u16, ret: &str) -> String {
        format!(
            r#"{{"roots": [{{
                "type": "method",
                "identifier": "{identifier}",
                "trace": [{{"event": "instruction", "opcode": {opcode}, "offset": 0}}],
                "return_value": {{"kind": "primitive", "type_tag": "I", "repr": "{ret}"}}
            }}]}}"#
        )
    }

    fn write_version(
        root: &Path,
        name: &str,
        traces: &[(&str, String)],
        changes: &str,
        callgraph: &str,
    ) -> VersionInputs {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("traces")).unwrap();
        for (file, content) in traces {
            std::fs::write(dir.join("traces").join(file), content).unwrap();
        }
        std::fs::write(dir.join("changes.json"), changes).unwrap();
        std::fs::write(dir.join("callgraph.json"), callgraph).unwrap();
        VersionInputs::from_version_dir(&dir)
    }

    #[test]
    fn test_pipeline_over_two_versions() {
        let dir = tempdir().unwrap();
        let old = write_version(
            dir.path(),
            "v1",
            &[("run.json", trace_json("Main.run()V", 4, "1"))],
            "{}",
            "{}",
        );
        let new = write_version(
            dir.path(),
            "v2",
            &[("run.json", trace_json("Main.run()V", 5, "2"))],
            r#"{"Main.run": [{"kind": "modification", "new_code": "x"}]}"#,
            r#"{"Main.run()V": []}"#,
        );

        let usecase = AnalyzeUsecase {
            trace_importer: &JsonTraceImporter,
            change_importer: &JsonChangeImporter,
            callgraph_importer: &JsonCallGraphImporter,
            matching_importer: &JsonMatchingImporter,
            cache: None,
            matcher: TraceMatcher::default(),
            detector_config: DetectorConfig::default(),
            policy: ScalingPolicy::default(),
        };

        let reports = usecase.run(&[old, new]).unwrap();
        assert_eq!(reports.len(), 1);

        let report = &reports[0];
        assert_eq!(report.new_version, "v2");
        assert_eq!(report.matched_traces, 1);
        // The modified entry diverges in return value, so it ranks.
        assert!(!report.targets.is_empty());
    }

    #[test]
    fn test_run_rejects_single_version() {
        let dir = tempdir().unwrap();
        let only = write_version(dir.path(), "v1", &[], "{}", "{}");

        let usecase = AnalyzeUsecase {
            trace_importer: &JsonTraceImporter,
            change_importer: &JsonChangeImporter,
            callgraph_importer: &JsonCallGraphImporter,
            matching_importer: &JsonMatchingImporter,
            cache: None,
            matcher: TraceMatcher::default(),
            detector_config: DetectorConfig::default(),
            policy: ScalingPolicy::default(),
        };
        assert!(usecase.run(&[only]).is_err());
    }
}
