//! Skill definitions: ordered multi-step workflows loaded from YAML files.
//!
//! A skill file looks like:
//!
//! ```yaml
//! name: recon_osint
//! description: Passive recon chain
//! steps:
//!   - tool: amass
//!     output: subs
//!   - tool: rustscan
//!     output: ports
//!   - tool: nuclei
//!     output: vulns
//!   - tool: suggest_next
//!     action: suggest_next
//!     timeout_sec: 120
//! ```
//!
//! Skills are static: loaded once per job, never mutated at runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read skill file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse skill file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Internal actions a step may run instead of calling the tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Persist the job's accumulated findings to the `findings` artifact.
    StoreFindings,
    /// Rule-based next-step suggestions behind an approval gate.
    SuggestNext,
}

/// One step of a skill chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    /// Prior step's artifact name this step consumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Artifact name this step's output is persisted under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<StepAction>,
    /// Tool-specific extras, merged into the payload without overwriting
    /// template fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A named workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Load `<dir>/<name>.yaml`.
pub fn load_skill(dir: &Path, name: &str) -> Result<Skill, SkillError> {
    let path = dir.join(format!("{}.yaml", name));
    if !path.exists() {
        return Err(SkillError::NotFound(path));
    }
    let text = std::fs::read_to_string(&path).map_err(|source| SkillError::Io {
        path: path.clone(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| SkillError::Parse { path, source })
}
