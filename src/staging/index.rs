use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{StagingError, HIDDEN_PREFIX};

/// JSON sidecar mapping logical filename to absolute storage path.
///
/// Every operation is a read-merge-write of the whole file. Callers must hold
/// the tenant lock from [`super::StagingArea`] around mutations. A missing
/// sidecar reads as empty; an unreadable or undecodable one is an error and
/// is never reset to empty.
#[derive(Debug, Clone)]
pub struct StagingIndex {
    path: PathBuf,
}

impl StagingIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    async fn load(&self) -> Result<BTreeMap<String, PathBuf>, StagingError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StagingError::io(&self.path, e)),
        };

        serde_json::from_slice(&raw).map_err(|source| StagingError::IndexCorrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write through a hidden swap file and rename it over the sidecar, so a
    /// reader sees either the previous or the next index, never a torn one.
    async fn store(&self, entries: &BTreeMap<String, PathBuf>) -> Result<(), StagingError> {
        let encoded = serde_json::to_vec(entries).map_err(|source| StagingError::IndexCorrupt {
            path: self.path.clone(),
            source,
        })?;

        let swap = self.path.with_file_name(format!(
            "{HIDDEN_PREFIX}{}.swap",
            self.file_name().unwrap_or("index")
        ));
        fs::write(&swap, &encoded)
            .await
            .map_err(|e| StagingError::io(&swap, e))?;
        fs::rename(&swap, &self.path)
            .await
            .map_err(|e| StagingError::io(&self.path, e))
    }

    pub async fn put(&self, filename: &str, path: &Path) -> Result<(), StagingError> {
        let mut entries = self.load().await?;
        entries.insert(filename.to_string(), path.to_path_buf());
        self.store(&entries).await
    }

    /// Remove `filename` and write the index back, whether or not the key was
    /// present. Returns the path it mapped to.
    pub async fn delete(&self, filename: &str) -> Result<Option<PathBuf>, StagingError> {
        let mut entries = self.load().await?;
        let removed = entries.remove(filename);
        self.store(&entries).await?;
        Ok(removed)
    }

    pub async fn lookup(&self, filename: &str) -> Result<Option<PathBuf>, StagingError> {
        Ok(self.load().await?.remove(filename))
    }

    /// All entries ordered by filename, excluding any entry for the sidecar
    /// itself.
    pub async fn enumerate(&self) -> Result<Vec<(String, PathBuf)>, StagingError> {
        let own_name = self.file_name().map(str::to_string);
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|(name, _)| Some(name) != own_name.as_ref())
            .collect())
    }

    pub async fn replace(&self, entries: BTreeMap<String, PathBuf>) -> Result<(), StagingError> {
        self.store(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_put_creates_sidecar() {
        let dir = tempdir().unwrap();
        let index = StagingIndex::new(dir.path().join("f.json"));
        assert!(index.enumerate().await.unwrap().is_empty());

        index.put("cat.png", &dir.path().join("cat.png")).await.unwrap();

        assert!(index.path().exists());
        assert_eq!(index.lookup("cat.png").await.unwrap(), Some(dir.path().join("cat.png")));
        assert_eq!(index.lookup("dog.png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_merges_and_overwrites() {
        let dir = tempdir().unwrap();
        let index = StagingIndex::new(dir.path().join("f.json"));
        index.put("b.png", Path::new("/old/b.png")).await.unwrap();
        index.put("a.png", Path::new("/x/a.png")).await.unwrap();
        index.put("b.png", Path::new("/new/b.png")).await.unwrap();

        let entries = index.enumerate().await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("a.png".to_string(), PathBuf::from("/x/a.png")),
                ("b.png".to_string(), PathBuf::from("/new/b.png")),
            ]
        );
    }

    #[tokio::test]
    async fn delete_is_unconditional() {
        let dir = tempdir().unwrap();
        let index = StagingIndex::new(dir.path().join("f.json"));

        assert_eq!(index.delete("ghost.png").await.unwrap(), None);
        assert!(index.path().exists());

        index.put("a.png", Path::new("/x/a.png")).await.unwrap();
        assert_eq!(index.delete("a.png").await.unwrap(), Some(PathBuf::from("/x/a.png")));
        assert_eq!(index.lookup("a.png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_sidecar_is_fatal_not_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        std::fs::write(&path, b"{\"a.png\": ").unwrap();
        let index = StagingIndex::new(&path);

        assert!(matches!(index.enumerate().await, Err(StagingError::IndexCorrupt { .. })));
        assert!(matches!(
            index.put("b.png", Path::new("/x/b.png")).await,
            Err(StagingError::IndexCorrupt { .. })
        ));
        // the corrupt file is left untouched for inspection
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a.png\": ");
    }

    #[tokio::test]
    async fn enumerate_skips_own_entry() {
        let dir = tempdir().unwrap();
        let index = StagingIndex::new(dir.path().join("f.json"));
        index.put("f.json", &dir.path().join("f.json")).await.unwrap();
        index.put("a.png", &dir.path().join("a.png")).await.unwrap();

        let names: Vec<_> = index.enumerate().await.unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.png"]);
    }
}
