use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Result, ToolError};
use crate::tool::{Tool, ToolKind};

const DEFAULT_LIMIT: usize = 3;

struct DocEntry {
    cmdlet: &'static str,
    module: &'static str,
    synopsis: &'static str,
    keywords: &'static [&'static str],
}

const CATALOGUE: &[DocEntry] = &[
    DocEntry {
        cmdlet: "Get-ChildItem",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Gets the items and child items in one or more specified locations.",
        keywords: &["files", "folders", "directory", "list", "recurse", "ls", "dir"],
    },
    DocEntry {
        cmdlet: "Get-Item",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Gets the item at the specified location.",
        keywords: &["file", "folder", "path", "registry"],
    },
    DocEntry {
        cmdlet: "Remove-Item",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Deletes the specified items.",
        keywords: &["delete", "remove", "files", "cleanup", "recurse"],
    },
    DocEntry {
        cmdlet: "Copy-Item",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Copies an item from one location to another.",
        keywords: &["copy", "files", "backup"],
    },
    DocEntry {
        cmdlet: "Move-Item",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Moves an item from one location to another.",
        keywords: &["move", "rename", "files"],
    },
    DocEntry {
        cmdlet: "Test-Path",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Determines whether all elements of a path exist.",
        keywords: &["exists", "path", "check", "file"],
    },
    DocEntry {
        cmdlet: "Get-Process",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Gets the processes that are running on the local computer.",
        keywords: &["process", "cpu", "memory", "running", "tasks"],
    },
    DocEntry {
        cmdlet: "Stop-Process",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Stops one or more running processes.",
        keywords: &["kill", "process", "terminate"],
    },
    DocEntry {
        cmdlet: "Get-Service",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Gets the services on a computer.",
        keywords: &["service", "services", "status", "windows"],
    },
    DocEntry {
        cmdlet: "Restart-Service",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Stops and then starts one or more services.",
        keywords: &["service", "restart"],
    },
    DocEntry {
        cmdlet: "Get-Date",
        module: "Microsoft.PowerShell.Utility",
        synopsis: "Gets the current date and time.",
        keywords: &["date", "time", "days", "older", "age", "timestamp"],
    },
    DocEntry {
        cmdlet: "Where-Object",
        module: "Microsoft.PowerShell.Core",
        synopsis: "Selects objects from a collection based on their property values.",
        keywords: &["filter", "where", "older", "select", "condition"],
    },
    DocEntry {
        cmdlet: "ForEach-Object",
        module: "Microsoft.PowerShell.Core",
        synopsis: "Performs an operation against each item in a collection of input objects.",
        keywords: &["loop", "each", "iterate"],
    },
    DocEntry {
        cmdlet: "Select-Object",
        module: "Microsoft.PowerShell.Utility",
        synopsis: "Selects objects or object properties.",
        keywords: &["select", "properties", "first", "columns"],
    },
    DocEntry {
        cmdlet: "Sort-Object",
        module: "Microsoft.PowerShell.Utility",
        synopsis: "Sorts objects by property values.",
        keywords: &["sort", "order"],
    },
    DocEntry {
        cmdlet: "Export-Csv",
        module: "Microsoft.PowerShell.Utility",
        synopsis: "Converts objects into a series of CSV strings and saves the strings to a file.",
        keywords: &["csv", "export", "report", "save"],
    },
    DocEntry {
        cmdlet: "ConvertTo-Json",
        module: "Microsoft.PowerShell.Utility",
        synopsis: "Converts an object to a JSON-formatted string.",
        keywords: &["json", "serialize", "convert"],
    },
    DocEntry {
        cmdlet: "Invoke-RestMethod",
        module: "Microsoft.PowerShell.Utility",
        synopsis: "Sends an HTTP or HTTPS request to a RESTful web service.",
        keywords: &["http", "rest", "api", "web", "request"],
    },
    DocEntry {
        cmdlet: "Get-Content",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Gets the content of the item at the specified location.",
        keywords: &["read", "file", "content", "log", "tail"],
    },
    DocEntry {
        cmdlet: "Set-Content",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Writes new content or replaces existing content in a file.",
        keywords: &["write", "file", "content"],
    },
    DocEntry {
        cmdlet: "Get-EventLog",
        module: "Microsoft.PowerShell.Management",
        synopsis: "Gets the events in an event log on local or remote computers.",
        keywords: &["event", "log", "errors", "audit"],
    },
    DocEntry {
        cmdlet: "Register-ScheduledTask",
        module: "ScheduledTasks",
        synopsis: "Registers a scheduled task definition on a local computer.",
        keywords: &["schedule", "task", "cron", "recurring"],
    },
    DocEntry {
        cmdlet: "Get-CimInstance",
        module: "CimCmdlets",
        synopsis: "Gets the CIM instances of a class from a CIM server.",
        keywords: &["wmi", "cim", "hardware", "disk", "inventory"],
    },
    DocEntry {
        cmdlet: "Compress-Archive",
        module: "Microsoft.PowerShell.Archive",
        synopsis: "Creates a compressed archive, or zipped file, from specified files and directories.",
        keywords: &["zip", "archive", "compress", "backup"],
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocSnippet {
    pub cmdlet: &'static str,
    pub module: &'static str,
    pub synopsis: &'static str,
    pub url: String,
    pub score: u32,
}

fn tokens(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(str::to_lowercase)
        .filter(|t| t.len() > 1)
        .collect()
}

/// Keyword-scored search over the built-in cmdlet reference
pub fn search(query: &str, limit: usize) -> Vec<DocSnippet> {
    let terms = tokens(query);
    let mut hits: Vec<DocSnippet> = CATALOGUE
        .iter()
        .filter_map(|entry| {
            let name = entry.cmdlet.to_lowercase();
            let synopsis = entry.synopsis.to_lowercase();
            let score: u32 = terms
                .iter()
                .map(|t| {
                    let mut s = 0;
                    if name == *t {
                        s += 5;
                    } else if name.contains(t.as_str()) {
                        s += 3;
                    }
                    if entry.keywords.contains(&t.as_str()) {
                        s += 2;
                    }
                    if synopsis.contains(t.as_str()) {
                        s += 1;
                    }
                    s
                })
                .sum();

            (score > 0).then(|| DocSnippet {
                cmdlet: entry.cmdlet,
                module: entry.module,
                synopsis: entry.synopsis,
                url: format!(
                    "https://learn.microsoft.com/powershell/module/{}/{}",
                    entry.module.to_lowercase(),
                    name
                ),
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.cmdlet.cmp(b.cmdlet)));
    hits.truncate(limit);
    hits
}

#[derive(Default)]
pub struct DocumentationSearchTool;

#[async_trait]
impl Tool for DocumentationSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::DocumentationSearch
    }

    fn description(&self) -> &str {
        "Search the PowerShell cmdlet reference and return the most relevant snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 10}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid(self.kind().name(), "'query' is required"))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let results = search(query, limit);
        Ok(json!({ "query": query, "results": results }))
    }
}
