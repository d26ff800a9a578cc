use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::DatasetRef;
use crate::repo::persistence::RepoFile;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RefCreated,
    RefUpdated,
    RefRemoved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(rename = "ref")]
    pub dataset_ref: DatasetRef,
}

/// Append-only record of refstore mutations, one JSON object per line.
pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn append(&self, kind: EventKind, r: &DatasetRef) -> Result<Event> {
        let event = Event {
            timestamp: Utc::now(),
            kind,
            dataset_ref: r.bare(),
        };
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(event)
    }

    /// Events oldest first.
    pub fn events(&self, limit: usize, offset: usize) -> Result<Vec<Event>> {
        let content = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            match fs::read_to_string(&self.path) {
                Ok(c) => c,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            }
        };

        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .skip(offset)
            .take(limit)
            .map(|l| {
                serde_json::from_str(l).map_err(|source| Error::Corrupt {
                    artifact: RepoFile::EventLog.artifact(),
                    source,
                })
            })
            .collect()
    }
}
