use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::script_store::{resolve_script, ScriptStore};
use crate::tool::{Tool, ToolKind};

const LONG_SCRIPT_LINES: usize = 500;
const LONG_LINE_CHARS: usize = 120;
const LONG_LINE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub total_lines: usize,
    pub comment_lines: usize,
    pub empty_lines: usize,
    pub code_lines: usize,
    pub comment_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// 0.0 to 10.0, one decimal
    pub quality_score: f64,
    pub metrics: QualityMetrics,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn analyze(script: &str) -> QualityReport {
    let lines: Vec<&str> = script.split('\n').collect();
    let comment_lines = lines.iter().filter(|l| l.trim().starts_with('#')).count();
    let empty_lines = lines.iter().filter(|l| l.trim().is_empty()).count();
    let code_lines = lines.len() - comment_lines - empty_lines;
    let metrics = QualityMetrics {
        total_lines: lines.len(),
        comment_lines,
        empty_lines,
        code_lines,
        comment_ratio: comment_lines as f64 / code_lines.max(1) as f64,
    };

    let lower = script.to_lowercase();
    let mut score: f64 = 5.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let mut reward = |present: bool, points: f64, advice: &str| {
        if present {
            score += points;
        } else {
            recommendations.push(advice.to_string());
        }
    };
    reward(
        lower.contains("[cmdletbinding()]"),
        1.0,
        "Add [CmdletBinding()] for advanced function features",
    );
    reward(
        lower.contains("param("),
        0.5,
        "Define parameters using a param() block",
    );
    reward(
        metrics.comment_ratio > 0.1,
        0.5,
        "Add more comments to improve code documentation",
    );
    reward(
        lower.contains("try") && lower.contains("catch"),
        1.0,
        "Implement try/catch error handling",
    );

    if metrics.code_lines > LONG_SCRIPT_LINES {
        score -= 0.5;
        issues.push("Script is very long - consider breaking into modules".to_string());
    }
    let long_lines = lines
        .iter()
        .filter(|l| l.chars().count() > LONG_LINE_CHARS)
        .count();
    if long_lines > LONG_LINE_LIMIT {
        score -= 0.5;
        issues.push(format!("{long_lines} lines exceed {LONG_LINE_CHARS} characters"));
    }

    QualityReport {
        quality_score: (score.clamp(0.0, 10.0) * 10.0).round() / 10.0,
        metrics,
        issues,
        recommendations,
    }
}

pub struct QualityAnalysisTool {
    scripts: Arc<dyn ScriptStore>,
}

impl QualityAnalysisTool {
    pub fn new(scripts: Arc<dyn ScriptStore>) -> Self {
        Self { scripts }
    }
}

#[async_trait]
impl Tool for QualityAnalysisTool {
    fn kind(&self) -> ToolKind {
        ToolKind::QualityAnalysis
    }

    fn description(&self) -> &str {
        "Score a PowerShell script's code quality from 0 to 10 and list recommendations."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "script": {"type": "string"},
                "script_id": {"type": "string"}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let script = resolve_script(self.kind().name(), &args, self.scripts.as_ref()).await?;
        serde_json::to_value(analyze(&script)).map_err(|e| ToolError::Execution(e.to_string()))
    }
}
