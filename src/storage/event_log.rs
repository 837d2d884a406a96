//! JSON-lines event log reader.

use crate::error::Result;
use crate::events::RawEvent;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const LOG_EXTENSIONS: &[&str] = &["json", "jsonl"];

#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<RawEvent>,
    /// Non-blank lines that were not a JSON object
    pub malformed: usize,
    pub files: Vec<PathBuf>,
}

/// Read one log file, or every `*.json` / `*.jsonl` file under a directory in path order.
pub fn read_events(path: &Path) -> Result<EventLog> {
    let mut log = EventLog::default();
    if path.is_dir() {
        for entry in WalkDir::new(path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let p = entry.path();
            let is_log = p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| LOG_EXTENSIONS.contains(&e));
            if entry.file_type().is_file() && is_log {
                read_file(p, &mut log)?;
            }
        }
    } else {
        read_file(path, &mut log)?;
    }
    if log.malformed > 0 {
        warn!(malformed = log.malformed, "skipped unparsable event records");
    }
    info!(
        files = log.files.len(),
        events = log.events.len(),
        "read event log"
    );
    Ok(log)
}

fn read_file(path: &Path, log: &mut EventLog) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => log.events.push(event),
            Err(e) => {
                debug!(path = %path.display(), line = i + 1, error = %e, "malformed event record");
                log.malformed += 1;
            }
        }
    }
    log.files.push(path.to_path_buf());
    Ok(())
}
