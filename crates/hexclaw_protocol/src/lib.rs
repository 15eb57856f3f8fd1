//! Canonical protocol types shared across the HexClaw crates.
//!
//! Everything that crosses a crate boundary lives here: job and finding
//! types, approval outcomes, skill definitions, the chat transport trait,
//! and the environment-keyed configuration.

pub mod config;
pub mod defaults;
pub mod skill;
pub mod transport;
pub mod types;

pub use config::{ConfigError, HexClawConfig};
pub use skill::{load_skill, Skill, SkillError, Step, StepAction};
pub use transport::{Button, ChatTransport, NullTransport};
pub use types::{
    Alert, ApprovalOutcome, Finding, Job, JobId, JobStatus, Severity, Tier,
};
