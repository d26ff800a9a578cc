//! Dataset references and the minimal dataset document they point to.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cafs;
use crate::identity::ProfileId;
use crate::{Error, Result};

/// Alias a caller may use in place of the local peername.
pub const ME: &str = "me";

/// A named pointer, scoped to a peer, at one content-addressed dataset version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peername: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Content address of the version. Empty until resolved.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,
    /// Dataset document, when it has been loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Box<Dataset>>,
}

impl DatasetRef {
    pub fn new(peername: impl Into<String>, name: impl Into<String>) -> Self {
        DatasetRef {
            peername: peername.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// The `peername/name` pair that is unique within one refstore.
    pub fn key(&self) -> String {
        format!("{}/{}", self.peername, self.name)
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.peername.is_empty() && self.name.is_empty() && self.path.is_empty()
    }

    /// True when `other` names the same dataset: same key, or same path when
    /// either side is unnamed.
    pub fn matches(&self, other: &DatasetRef) -> bool {
        if self.has_name() && other.has_name() {
            return self.peername == other.peername && self.name == other.name;
        }
        !self.path.is_empty() && self.path == other.path
    }

    /// A copy without the loaded dataset document.
    pub fn bare(&self) -> DatasetRef {
        DatasetRef {
            dataset: None,
            ..self.clone()
        }
    }

    /// Parses `peername/name`, `peername/name@path`, `@path` or a bare path.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_start_matches('/');
        if s.is_empty() {
            return Err(Error::InvalidInput("empty dataset reference".to_string()));
        }

        let restored = format!("/{}", s);
        if restored.starts_with(cafs::PATH_PREFIX) && cafs::parse_address(&restored).is_ok() {
            return Ok(DatasetRef::default().with_path(restored));
        }

        let (names, path) = match s.split_once('@') {
            Some((names, path)) => {
                let path = format!("/{}", path.trim_start_matches('/'));
                cafs::parse_address(&path)?;
                (names, path)
            }
            None => (s, String::new()),
        };

        let mut r = DatasetRef::default().with_path(path);
        if names.is_empty() {
            return Ok(r);
        }
        match names.split_once('/') {
            Some((peername, name)) => {
                validate_name(peername)?;
                validate_name(name)?;
                r.peername = peername.to_string();
                r.name = name.to_string();
            }
            None => {
                validate_name(names)?;
                r.name = names.to_string();
            }
        }
        Ok(r)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_name() {
            write!(f, "{}/{}", self.peername, self.name)?;
        }
        if !self.path.is_empty() {
            write!(f, "@{}", self.path)?;
        }
        Ok(())
    }
}

impl FromStr for DatasetRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DatasetRef::parse(s)
    }
}

/// Checks that a peername or dataset name is usable as a ref component.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("name cannot be empty".to_string()));
    }
    if !name.chars().next().map_or(false, |c| c.is_ascii_alphabetic()) {
        return Err(Error::InvalidInput(format!(
            "invalid name {:?}: must start with a letter",
            name
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(Error::InvalidInput(format!(
            "invalid name {:?}: unexpected character {:?}",
            name, c
        )));
    }
    Ok(())
}

/// The stored document behind a dataset version.
///
/// Only fields the repo itself reads are typed. Everything else rides along
/// untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Address of the version this one replaces.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_path: String,
    /// Addresses of datasets this one was derived from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Dataset {
    /// Text fed to the search index.
    pub fn search_text(&self) -> String {
        let mut text = String::new();
        for part in [&self.title, &self.description, &self.commit_message] {
            text.push_str(part);
            text.push(' ');
        }
        text.push_str(&self.keywords.join(" "));
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn some_path() -> String {
        cafs::address(b"some dataset")
    }

    #[test]
    fn test_parse_forms() {
        let r = DatasetRef::parse("alice/trees").unwrap();
        assert_eq!((r.peername.as_str(), r.name.as_str(), r.path.as_str()), ("alice", "trees", ""));

        let path = some_path();
        let r = DatasetRef::parse(&format!("alice/trees@{}", path)).unwrap();
        assert_eq!(r.path, path);
        assert_eq!(r.name, "trees");

        let r = DatasetRef::parse(&path).unwrap();
        assert!(!r.has_name());
        assert_eq!(r.path, path);

        let r = DatasetRef::parse(&format!("@{}", path)).unwrap();
        assert_eq!(r.path, path);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DatasetRef::parse("").unwrap_err().is_client_error());
        assert!(DatasetRef::parse("alice/9trees").unwrap_err().is_client_error());
        assert!(DatasetRef::parse("alice/trees@/map/nope").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let r = DatasetRef::new("alice", "trees").with_path(some_path());
        assert_eq!(DatasetRef::parse(&r.to_string()).unwrap(), r);
    }

    #[test]
    fn test_dataset_keeps_unknown_fields() {
        let raw = json!({
            "title": "trees",
            "structure": {"format": "csv"},
            "previous_path": "/map/QmPrev"
        });
        let ds: Dataset = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(ds.title, "trees");
        assert_eq!(ds.previous_path, "/map/QmPrev");
        assert_eq!(serde_json::to_value(&ds).unwrap(), raw);
    }
}
