//! Tool registry: the closed map from step tool names to what actually runs.
//!
//! Three kinds of tool:
//!   - External: an HTTP endpoint on the tool server. The registry owns the
//!     per-tool payload template and the per-tool translation of the JSON
//!     response into artifact records and normalised findings.
//!   - Internal: a dispatcher action (`store_findings`, `suggest_next`).
//!   - Unknown: a no-op that synthesises success, so dry-composed skills
//!     keep chaining; the dispatcher records a warning.
//!
//! Adding a tool means adding an arm to `resolve`, a payload template, and
//! (when its output is structured) an extraction arm.

use async_trait::async_trait;
use hexclaw_artifacts::Record;
use hexclaw_protocol::{Finding, Severity, StepAction};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// How a step's `tool` string resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// POST to this path on the tool server
    External(&'static str),
    /// Run inside the dispatcher, no HTTP
    Internal(StepAction),
    /// Not in the map: synthetic success + warning
    Unknown,
}

/// Resolve a tool name from the closed endpoint map.
pub fn resolve(tool: &str) -> ToolKind {
    match tool {
        "amass" => ToolKind::External("api/tools/amass-enum"),
        "subfinder" => ToolKind::External("api/tools/subfinder"),
        "rustscan" => ToolKind::External("api/tools/rustscan-fast-scan"),
        "masscan" => ToolKind::External("api/tools/masscan-high-speed"),
        "nmap" => ToolKind::External("api/tools/nmap-scan"),
        "nuclei" => ToolKind::External("api/tools/nuclei"),
        "gobuster" => ToolKind::External("api/tools/gobuster"),
        "ffuf" => ToolKind::External("api/tools/ffuf"),
        "httpx" => ToolKind::External("api/tools/httpx"),
        "store_findings" => ToolKind::Internal(StepAction::StoreFindings),
        "suggest_next" => ToolKind::Internal(StepAction::SuggestNext),
        _ => ToolKind::Unknown,
    }
}

/// Build the POST body for an external tool from the job target and the
/// step's extras. Extras merge last and never overwrite a template field.
pub fn build_payload(tool: &str, target: &str, extras: &BTreeMap<String, Value>) -> Value {
    let mut payload = match tool {
        "amass" => json!({"domain": target, "mode": "passive", "max_time": 120}),
        "subfinder" => json!({"domain": target}),
        "rustscan" => json!({"target": target, "timeout": 3000, "batch_size": 4500}),
        "nuclei" => json!({"target": target, "severity": "medium,high,critical", "timeout": 120}),
        "httpx" => json!({"target": target, "timeout": 30}),
        "nmap" => json!({"target": target, "scan_profile": "quick"}),
        "gobuster" => json!({
            "url": format!("http://{}", target),
            "mode": "dir",
            "wordlist": "/usr/share/wordlists/dirb/common.txt"
        }),
        _ => json!({"target": target}),
    };

    let body = payload.as_object_mut().expect("templates are objects");
    for (key, value) in extras {
        if !body.contains_key(key) {
            body.insert(key.clone(), value.clone());
        }
    }
    payload
}

/// Translate a tool's JSON result into artifact records.
pub fn extract_records(tool: &str, result: &Value) -> Vec<Record> {
    match tool {
        "amass" | "subfinder" => str_list(result, "subdomains")
            .into_iter()
            .map(|sub| object(json!({"subdomain": sub})))
            .collect(),
        "rustscan" | "masscan" | "nmap" => ports_of(result)
            .iter()
            .filter_map(|port| match port {
                Value::Object(map) => Some(map.clone()),
                Value::Number(_) | Value::String(_) => {
                    Some(object(json!({"port": port.clone()})))
                }
                _ => None,
            })
            .collect(),
        "nuclei" => extract_findings(tool, result)
            .iter()
            .map(|finding| {
                object(json!({
                    "tool": finding.tool,
                    "severity": finding.severity.as_str(),
                    "title": finding.title,
                    "detail": finding.detail,
                }))
            })
            .collect(),
        _ => vec![object(json!({"raw": result.to_string()}))],
    }
}

/// Extract normalised findings from a tool result.
pub fn extract_findings(tool: &str, result: &Value) -> Vec<Finding> {
    match tool {
        "nuclei" => result
            .get("vulnerabilities")
            .and_then(Value::as_array)
            .map(|vulns| vulns.iter().map(|v| vuln_to_finding(tool, v)).collect())
            .unwrap_or_default(),
        "amass" | "subfinder" => str_list(result, "subdomains")
            .into_iter()
            .take(50)
            .map(|sub| Finding::new(tool, Severity::Info, sub))
            .collect(),
        "rustscan" | "masscan" | "nmap" => ports_of(result)
            .iter()
            .take(50)
            .map(|port| {
                let title = match port {
                    Value::Object(map) => map
                        .get("port")
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| port.to_string()),
                    other => other.to_string().trim_matches('"').to_string(),
                };
                Finding::new(tool, Severity::Info, title)
            })
            .collect(),
        _ => {
            let generic = result
                .get("findings")
                .or_else(|| result.get("vulnerabilities"))
                .and_then(Value::as_array);
            generic
                .map(|items| items.iter().map(|v| vuln_to_finding(tool, v)).collect())
                .unwrap_or_default()
        }
    }
}

fn vuln_to_finding(tool: &str, value: &Value) -> Finding {
    let severity = value
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::parse_lossy)
        .unwrap_or(Severity::Info);
    let title = value
        .get("template")
        .or_else(|| value.get("title"))
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} finding", tool));
    let detail = value
        .get("detail")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Finding {
        tool: tool.to_string(),
        severity,
        title,
        detail,
    }
}

fn str_list(result: &Value, key: &str) -> Vec<String> {
    result
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn ports_of(result: &Value) -> Vec<Value> {
    result
        .get("open_ports")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

// ============================================================================
// Tool server client
// ============================================================================

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("network error: {0}")]
    Network(String),

    #[error("tool server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed tool response: {0}")]
    Parse(String),
}

/// The seam to the external tool server. Tests script this; `--dry-run`
/// swaps in the synthesising client.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn call(&self, tool: &str, endpoint: &str, payload: &Value) -> Result<Value, ToolError>;
}

/// Live HTTP client against the configured tool server.
pub struct HttpToolClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    async fn call(&self, tool: &str, endpoint: &str, payload: &Value) -> Result<Value, ToolError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                error!("Tool {} transport error: {}", tool, err);
                ToolError::Network(err.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            error!("Tool {} HTTP {}: {}", tool, status, body);
            return Err(ToolError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|err| ToolError::Parse(err.to_string()))
    }
}

/// Dry-run client: logs the call and synthesises success.
pub struct DryRunToolClient;

#[async_trait]
impl ToolClient for DryRunToolClient {
    async fn call(&self, tool: &str, endpoint: &str, payload: &Value) -> Result<Value, ToolError> {
        tracing::info!("[dry run] Would call {} with {}", endpoint, payload);
        Ok(json!({"success": true, "tool": tool, "dry_run": true}))
    }
}
