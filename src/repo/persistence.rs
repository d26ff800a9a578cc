use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Files a repo keeps under its base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoFile {
    Profile,
    Profiles,
    Refstore,
    RefCache,
    EventLog,
    SearchIndex,
    Config,
}

/// Artifact name for dataset documents read back from the content store.
pub const DATASET_ARTIFACT: &str = "dataset";

impl RepoFile {
    pub const ALL: [RepoFile; 7] = [
        RepoFile::Profile,
        RepoFile::Profiles,
        RepoFile::Refstore,
        RepoFile::RefCache,
        RepoFile::EventLog,
        RepoFile::SearchIndex,
        RepoFile::Config,
    ];

    pub fn filename(&self) -> &'static str {
        match self {
            RepoFile::Profile => "profile.json",
            RepoFile::Profiles => "profiles.json",
            RepoFile::Refstore => "refs.json",
            RepoFile::RefCache => "ref_cache.json",
            RepoFile::EventLog => "events.jsonl",
            RepoFile::SearchIndex => "search_index.json",
            RepoFile::Config => "config.json",
        }
    }

    /// Human name used when a file fails to decode.
    pub fn artifact(&self) -> &'static str {
        match self {
            RepoFile::Profile => "profile",
            RepoFile::Profiles => "profile store",
            RepoFile::Refstore => "refstore",
            RepoFile::RefCache => "ref cache",
            RepoFile::EventLog => "event log",
            RepoFile::SearchIndex => "search index",
            RepoFile::Config => "config",
        }
    }
}

/// Writes `data` as JSON to `path` atomically.
///
/// The bytes land in a uniquely named temporary sibling first and are renamed
/// over the destination, so readers never observe a half-written file and
/// concurrent writers never share a temporary.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(data)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(&bytes)?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}

/// Reads JSON from `path`. A missing file is `Ok(None)`; a file that fails to
/// parse is [`Error::Corrupt`] naming `artifact`.
pub fn load_json<T: DeserializeOwned>(path: &Path, artifact: &'static str) -> Result<Option<T>> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|source| Error::Corrupt { artifact, source })
}

/// Disk layout of one repo instance, rooted at a base directory.
#[derive(Debug)]
pub struct Persistence {
    base: PathBuf,
}

impl Persistence {
    /// Opens the layout at `dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let base = dir.as_ref().to_path_buf();
        if !base.exists() {
            fs::create_dir_all(&base)?;
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn filepath(&self, file: RepoFile) -> PathBuf {
        self.base.join(file.filename())
    }

    pub fn exists(&self, file: RepoFile) -> bool {
        self.filepath(file).exists()
    }

    pub fn save_file<T: Serialize + ?Sized>(&self, file: RepoFile, data: &T) -> Result<()> {
        save_json(&self.filepath(file), data)
    }

    pub fn read_file<T: DeserializeOwned>(&self, file: RepoFile) -> Result<Option<T>> {
        load_json(&self.filepath(file), file.artifact())
    }

    /// Like [`read_file`](Self::read_file) but yields the zero value when the
    /// file is absent.
    pub fn load_file<T: DeserializeOwned + Default>(&self, file: RepoFile) -> Result<T> {
        Ok(self.read_file(file)?.unwrap_or_default())
    }

    /// Removes every file under the base directory, and the directory itself.
    pub fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.base) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();

        let mut data = HashMap::new();
        data.insert("key1".to_string(), json!("value1"));
        persistence.save_file(RepoFile::Refstore, &data).unwrap();

        let loaded: HashMap<String, serde_json::Value> =
            persistence.load_file(RepoFile::Refstore).unwrap();
        assert_eq!(loaded.get("key1").unwrap(), &json!("value1"));
    }

    #[test]
    fn test_atomic_rename() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();
        persistence.save_file(RepoFile::Profile, &json!({"peername": "alice"})).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["profile.json"]);
    }

    #[test]
    fn test_concurrent_saves_do_not_collide() {
        let dir = tempdir().unwrap();
        let persistence = Arc::new(Persistence::new(dir.path()).unwrap());

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let persistence = persistence.clone();
                std::thread::spawn(move || {
                    for round in 0..20 {
                        persistence
                            .save_file(RepoFile::Profile, &json!({ "writer": i, "round": round }))
                            .unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let last: serde_json::Value = persistence.read_file(RepoFile::Profile).unwrap().unwrap();
        assert_eq!(last["round"], json!(19));
    }

    #[test]
    fn test_absent_is_zero_value() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();
        let loaded: Vec<String> = persistence.load_file(RepoFile::Profiles).unwrap();
        assert!(loaded.is_empty());
        let read: Option<Vec<String>> = persistence.read_file(RepoFile::Profiles).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_corrupt_names_artifact() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path()).unwrap();
        fs::write(persistence.filepath(RepoFile::Refstore), "{not json").unwrap();

        let err = persistence.load_file::<Vec<String>>(RepoFile::Refstore).unwrap_err();
        assert!(matches!(err, Error::Corrupt { artifact: "refstore", .. }));
        assert!(err.to_string().starts_with("error decoding refstore"));
    }

    #[test]
    fn test_destroy() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("repo");
        let persistence = Persistence::new(&base).unwrap();
        persistence.save_file(RepoFile::Profile, &json!({})).unwrap();
        persistence.destroy().unwrap();
        assert!(!base.exists());
    }
}
