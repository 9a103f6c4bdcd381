use crate::application::VersionPairReport;
use crate::domain::ranking::TestingTarget;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportDto {
    pub old_version: String,
    pub new_version: String,
    pub matched_traces: usize,
    pub unmatched_traces: usize,
    pub targets: Vec<TargetDto>,
}

/// Flat wire shape for one ranked target; optional fields are absent for
/// target kinds that do not carry them.
#[derive(Debug, Serialize, Deserialize)]
pub struct TargetDto {
    pub kind: String,
    pub identifier: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercised: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_methods: Option<Vec<String>>,
}

impl From<&TestingTarget> for TargetDto {
    fn from(target: &TestingTarget) -> Self {
        match target {
            TestingTarget::SyntaxOnly {
                identifier,
                change_count,
                score,
            } => TargetDto {
                kind: "syntax_only".to_string(),
                identifier: identifier.clone(),
                score: *score,
                exercised: None,
                change_count: Some(*change_count),
                affected_methods: None,
            },
            TestingTarget::TraceOnly { identifier, score } => TargetDto {
                kind: "trace_only".to_string(),
                identifier: identifier.clone(),
                score: *score,
                exercised: None,
                change_count: None,
                affected_methods: None,
            },
            TestingTarget::Impact {
                identifier,
                score,
                exercised,
                change_count,
                affected_methods,
            } => TargetDto {
                kind: "impact".to_string(),
                identifier: identifier.clone(),
                score: *score,
                exercised: Some(*exercised),
                change_count: Some(*change_count),
                affected_methods: Some(affected_methods.clone()),
            },
        }
    }
}

impl From<&VersionPairReport> for ReportDto {
    fn from(report: &VersionPairReport) -> Self {
        ReportDto {
            old_version: report.old_version.clone(),
            new_version: report.new_version.clone(),
            matched_traces: report.matched_traces,
            unmatched_traces: report.unmatched_traces,
            targets: report.targets.iter().map(TargetDto::from).collect(),
        }
    }
}
