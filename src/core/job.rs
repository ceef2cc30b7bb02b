//! Job data model for the submission graph.
//!
//! A job is one submittable unit: a batch script (or literal command) plus
//! the identifier the external scheduler hands back once it is queued.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{Error, Result};

/// Locally generated, opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What gets handed to the batch scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Payload {
    /// Path to a script file on disk.
    Script(PathBuf),
    /// Script text passed to the scheduler on stdin.
    Literal(String),
}

impl Payload {
    /// Treat `value` as a script path when such a file exists, otherwise
    /// as a literal.
    pub fn infer(value: &str) -> Self {
        if Path::new(value).is_file() {
            Payload::Script(PathBuf::from(value))
        } else {
            Payload::Literal(value.to_string())
        }
    }
}

/// A submittable unit in the job graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Human-readable name, also used as the batch job name.
    pub name: String,
    pub payload: Payload,
    scheduler_id: Option<String>,
}

impl Job {
    pub fn new(name: &str, payload: Payload) -> Self {
        Self {
            id: JobId::new(),
            name: name.to_string(),
            payload,
            scheduler_id: None,
        }
    }

    /// External identifier, once submitted.
    pub fn scheduler_id(&self) -> Option<&str> {
        self.scheduler_id.as_deref()
    }

    pub fn is_submitted(&self) -> bool {
        self.scheduler_id.is_some()
    }

    /// Record the external identifier. It can be set once only.
    pub fn set_scheduler_id(&mut self, id: &str) -> Result<()> {
        if self.scheduler_id.is_some() {
            return Err(Error::SchedulerIdAlreadySet(self.id));
        }
        self.scheduler_id = Some(id.to_string());
        Ok(())
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scheduler_id {
            Some(sid) => write!(f, "{} ({})", self.name, sid),
            None => write!(f, "{}", self.name),
        }
    }
}
