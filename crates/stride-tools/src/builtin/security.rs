use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::script_store::{resolve_script, ScriptStore};
use crate::tool::{Tool, ToolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    DestructiveOperation,
    CredentialExposure,
    CodeInjection,
    Obfuscation,
    PolicyBypass,
    NetworkDownload,
    ProcessCreation,
    CodeCompilation,
    StealthExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s > 30 => Self::Critical,
            s if s > 20 => Self::High,
            s if s > 10 => Self::Medium,
            _ => Self::Low,
        }
    }
}

struct Pattern {
    regex: Regex,
    category: FindingCategory,
    severity: u32,
    description: &'static str,
}

fn pattern(
    re: &str,
    category: FindingCategory,
    severity: u32,
    description: &'static str,
) -> Pattern {
    Pattern {
        regex: Regex::new(re).unwrap(),
        category,
        severity,
        description,
    }
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    use FindingCategory::*;

    vec![
        pattern(r"(?i)\binvoke-expression\b", CodeInjection, 10, "Invoke-Expression runs arbitrary strings as code"),
        pattern(r"(?i)(^|[^\w-])iex(\s|\()", CodeInjection, 10, "IEX is an alias for Invoke-Expression"),
        pattern(r"(?i)downloadstring", CodeInjection, 9, "Downloads and executes remote code"),
        pattern(r"(?i)downloadfile", NetworkDownload, 7, "Downloads files from the internet"),
        pattern(r"(?i)-executionpolicy\s+bypass", PolicyBypass, 8, "Bypasses the execution policy"),
        pattern(r"(?i)set-executionpolicy\s+unrestricted", PolicyBypass, 8, "Sets an unrestricted execution policy"),
        pattern(r"(?i)-e(nc(odedcommand)?)?\s+[A-Za-z0-9+/=]{16,}", Obfuscation, 8, "Runs a base64-encoded command"),
        pattern(r"(?i)\[system\.convert\]::frombase64string", Obfuscation, 6, "Decodes base64 content at runtime"),
        pattern(r"(?i)-join\s*\(\s*\[char\[\]\]", Obfuscation, 6, "Builds strings from character arrays"),
        pattern(r"(?i)-windowstyle\s+hidden", StealthExecution, 7, "Launches a hidden window"),
        pattern(r"(?i)\binvoke-webrequest\b", NetworkDownload, 5, "Makes web requests"),
        pattern(r"(?i)\bstart-bitstransfer\b", NetworkDownload, 5, "Transfers files over BITS"),
        pattern(r"(?i)\bstart-process\b", ProcessCreation, 6, "Spawns new processes"),
        pattern(r"(?i)\badd-type\b", CodeCompilation, 6, "Compiles and loads C# code"),
        pattern(r"(?i)\bformat-volume\b", DestructiveOperation, 10, "Formats entire disk volumes"),
        pattern(r"(?i)\bclear-disk\b", DestructiveOperation, 10, "Wipes an entire disk"),
        pattern(r"(?i)remove-item\s+.*-recurse.*[/\\](windows|system32|program files)", DestructiveOperation, 10, "Recursively deletes system folders"),
        pattern(r"(?i)remove-item(property)?\s+.*hklm:\\", DestructiveOperation, 9, "Deletes machine registry keys"),
        pattern(r"(?i)(stop|restart)-computer\s*-force", DestructiveOperation, 5, "Forces an immediate shutdown or restart"),
        pattern(r"(?i)set-netfirewallprofile\s+.*-enabled\s+false", DestructiveOperation, 8, "Disables the firewall"),
        pattern(r#"(?i)password\s*=\s*["'][^"']+["']"#, CredentialExposure, 8, "Hardcoded password"),
        pattern(r#"(?i)api[_-]?key\s*=\s*["'][^"']+["']"#, CredentialExposure, 8, "Hardcoded API key"),
        pattern(r"(?i)authorization.*bearer\s+[a-z0-9\-_.]{8,}", CredentialExposure, 8, "Hardcoded bearer token"),
        pattern(r"(?i)convertto-securestring\s+.*-asplaintext", CredentialExposure, 6, "Converts a plain-text password"),
    ]
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: u32,
    pub description: &'static str,
    pub line: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityReport {
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub findings: Vec<Finding>,
    pub best_practices: Vec<&'static str>,
}

/// Scan a script line by line. Each pattern counts once, at its first match.
pub fn scan(script: &str) -> SecurityReport {
    let mut findings = Vec::new();

    for p in PATTERNS.iter() {
        let hit = script
            .lines()
            .enumerate()
            .find(|(_, line)| p.regex.is_match(line));
        if let Some((idx, line)) = hit {
            findings.push(Finding {
                category: p.category,
                severity: p.severity,
                description: p.description,
                line: idx + 1,
                snippet: line.trim().chars().take(120).collect(),
            });
        }
    }

    let risk_score = findings.iter().map(|f| f.severity).sum();
    let lower = script.to_lowercase();
    let mut best_practices = Vec::new();
    if lower.contains("try") && lower.contains("catch") {
        best_practices.push("Implements error handling");
    }
    if lower.contains("[cmdletbinding()]") {
        best_practices.push("Uses advanced function features");
    }
    if lower.contains("validateset") || lower.contains("validatenotnull") {
        best_practices.push("Uses parameter validation");
    }

    SecurityReport {
        risk_level: RiskLevel::from_score(risk_score),
        risk_score,
        findings,
        best_practices,
    }
}

pub struct SecurityAnalysisTool {
    scripts: Arc<dyn ScriptStore>,
}

impl SecurityAnalysisTool {
    pub fn new(scripts: Arc<dyn ScriptStore>) -> Self {
        Self { scripts }
    }
}

#[async_trait]
impl Tool for SecurityAnalysisTool {
    fn kind(&self) -> ToolKind {
        ToolKind::SecurityAnalysis
    }

    fn description(&self) -> &str {
        "Scan a PowerShell script for dangerous patterns and return a risk score, risk level and findings."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "script": {"type": "string", "description": "Script source to scan"},
                "script_id": {"type": "string", "description": "Id of a stored script to scan"}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let script = resolve_script(self.kind().name(), &args, self.scripts.as_ref()).await?;
        let report = scan(&script);
        tracing::debug!(
            risk_score = report.risk_score,
            findings = report.findings.len(),
            "security scan finished"
        );
        serde_json::to_value(report).map_err(|e| ToolError::Execution(e.to_string()))
    }
}
