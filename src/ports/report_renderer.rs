//! Text Report Renderer
//!
//! Renders a ranked testing-target list as a human-readable report.

use crate::domain::ranking::TestingTarget;
use crate::ports::ReportExporter;
use anyhow::{Context, Result};
use std::path::Path;

pub struct TextReportExporter;

impl TextReportExporter {
    /// Render one version pair's ranked targets as plain text.
    pub fn render(version: &str, targets: &[TestingTarget]) -> String {
        let mut lines = Vec::new();
        lines.push(format!("Testing targets for version {}", version));
        lines.push(format!("{} target(s), most test-worthy first", targets.len()));
        lines.push(String::new());

        for (rank, target) in targets.iter().enumerate() {
            let line = match target {
                TestingTarget::Impact {
                    identifier,
                    score,
                    exercised,
                    change_count,
                    affected_methods,
                } => {
                    let exercised_tag = if *exercised { "exercised" } else { "not exercised" };
                    let mut line = format!(
                        "{:>3}. [impact, {}] {}  score={:.3}  changes={}",
                        rank + 1,
                        exercised_tag,
                        identifier,
                        score,
                        change_count
                    );
                    if !affected_methods.is_empty() {
                        line.push_str(&format!(
                            "  affects: {}",
                            affected_methods.join(", ")
                        ));
                    }
                    line
                }
                TestingTarget::SyntaxOnly {
                    identifier,
                    change_count,
                    score,
                } => format!(
                    "{:>3}. [syntax-only] {}  score={:.3}  changes={}",
                    rank + 1,
                    identifier,
                    score,
                    change_count
                ),
                TestingTarget::TraceOnly { identifier, score } => format!(
                    "{:>3}. [trace-only] {}  score={:.3}  (no matching syntax change)",
                    rank + 1,
                    identifier,
                    score
                ),
            };
            lines.push(line);
        }

        lines.push(String::new());
        lines.join("\n")
    }
}

impl ReportExporter for TextReportExporter {
    fn export(&self, version: &str, targets: &[TestingTarget], path: &Path) -> Result<()> {
        let content = Self::render(version, targets);
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}
