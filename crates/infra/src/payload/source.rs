//! Recorded events, the input of the series export.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A variable value change recorded at a given time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub timestamp: DateTime<Utc>,
    pub var_type: String,
    pub var_name: String,
    pub value: EventValue,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Value carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl EventValue {
    /// Text written in series files. Booleans become `1`/`0`, including
    /// textual ones.
    pub fn render(&self) -> String {
        match self {
            EventValue::Bool(true) => "1".to_string(),
            EventValue::Bool(false) => "0".to_string(),
            EventValue::Number(n) => n.to_string(),
            EventValue::Text(s) if s.eq_ignore_ascii_case("true") => "1".to_string(),
            EventValue::Text(s) if s.eq_ignore_ascii_case("false") => "0".to_string(),
            EventValue::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Where recorded events come from.
pub trait EventSource: Send + Sync {
    /// Every event recorded on `day` (UTC).
    fn events_for_day(&self, day: NaiveDate) -> Result<Vec<TimedEvent>, SourceError>;
}

/// Daily JSON-lines files: `<dir>/<YYYY-MM-DD>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlEventSource {
    dir: PathBuf,
}

impl JsonlEventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn day_file(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }
}

impl EventSource for JsonlEventSource {
    fn events_for_day(&self, day: NaiveDate) -> Result<Vec<TimedEvent>, SourceError> {
        let path = self.day_file(day);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            // Nothing recorded that day.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SourceError::Io { path, source }),
        };

        parse_lines(&path, &text)
    }
}

fn parse_lines(path: &Path, text: &str) -> Result<Vec<TimedEvent>, SourceError> {
    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(line).map_err(|e| SourceError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            reason: e.to_string(),
        })?;
        events.push(event);
    }
    Ok(events)
}

/// In-memory event source for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    days: HashMap<NaiveDate, Vec<TimedEvent>>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, day: NaiveDate, events: Vec<TimedEvent>) -> Self {
        self.days.entry(day).or_default().extend(events);
        self
    }
}

impl EventSource for InMemoryEventSource {
    fn events_for_day(&self, day: NaiveDate) -> Result<Vec<TimedEvent>, SourceError> {
        Ok(self.days.get(&day).cloned().unwrap_or_default())
    }
}
