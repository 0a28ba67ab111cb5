//! Chat events handed to downstream analysis.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One exchange: what the child said and what was answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub session_id: String,
    #[serde(serialize_with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub child_text: String,
    pub ai_text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub analysis_status: String,
}

fn rfc3339_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl ChatEvent {
    /// A new pending CHAT event stamped now.
    pub fn chat(
        user_id: &str,
        device_id: &str,
        session_id: &str,
        child_text: &str,
        ai_text: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            child_text: child_text.to_string(),
            ai_text: ai_text.to_string(),
            kind: "CHAT".to_string(),
            analysis_status: "PENDING".to_string(),
        }
    }
}

pub trait EventSink {
    fn record(&mut self, event: &ChatEvent) -> Result<()>;
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&mut self, _event: &ChatEvent) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    file: File,
}

impl JsonlEventSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events log '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl EventSink for JsonlEventSink {
    fn record(&mut self, event: &ChatEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(self.file, "{line}")
            .with_context(|| format!("failed to append to '{}'", self.path.display()))?;
        self.file.flush()?;
        Ok(())
    }
}
