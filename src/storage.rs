use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;

pub const UPLOADS_DIR: &str = "uploads";

#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    async fn put_file(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get_file(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete_file(&self, key: &str) -> Result<()>;

    /// Keys of every file stored directly under `dir`.
    async fn list_files(&self, dir: &str) -> Result<Vec<String>>;
}

/// Reduces a client-supplied filename to its last path segment and returns it
/// together with the storage key it is written under.
pub fn upload_key(original_name: &str) -> Option<(String, String)> {
    let name = original_name
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")?;
    Some((name.to_string(), format!("{UPLOADS_DIR}/{name}")))
}

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !safe {
            bail!("invalid storage key '{key}'");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn put_file(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete {}", path.display()))
            }
        }
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(dir)?;
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to list {}", path.display()))
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(format!("{dir}/{name}"));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_key_strips_directories() {
        assert_eq!(
            upload_key("../../etc/contacts.csv"),
            Some(("contacts.csv".to_string(), "uploads/contacts.csv".to_string()))
        );
        assert_eq!(
            upload_key("C:\\Users\\me\\book.xlsx"),
            Some(("book.xlsx".to_string(), "uploads/book.xlsx".to_string()))
        );
    }

    #[test]
    fn upload_key_rejects_empty_names() {
        assert_eq!(upload_key(""), None);
        assert_eq!(upload_key("dir/"), None);
        assert_eq!(upload_key(".."), None);
    }

    #[tokio::test]
    async fn writes_reads_and_deletes_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path());

        storage
            .put_file("uploads/a.csv", b"Name,Phone\n".to_vec())
            .await?;
        assert!(dir.path().join("uploads/a.csv").exists());
        assert_eq!(storage.get_file("uploads/a.csv").await?, b"Name,Phone\n");
        assert_eq!(storage.list_files(UPLOADS_DIR).await?, vec!["uploads/a.csv"]);

        storage.delete_file("uploads/a.csv").await?;
        assert!(!dir.path().join("uploads/a.csv").exists());
        // deleting twice is not an error
        storage.delete_file("uploads/a.csv").await?;
        Ok(())
    }

    #[tokio::test]
    async fn overwrites_on_name_collision() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path());

        storage.put_file("uploads/a.csv", b"first".to_vec()).await?;
        storage.put_file("uploads/a.csv", b"second".to_vec()).await?;
        assert_eq!(storage.get_file("uploads/a.csv").await?, b"second");
        Ok(())
    }

    #[tokio::test]
    async fn refuses_keys_outside_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        assert!(storage.get_file("../secret").await.is_err());
        assert!(storage.put_file("/abs", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn listing_a_missing_directory_is_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path());
        assert!(storage.list_files(UPLOADS_DIR).await?.is_empty());
        Ok(())
    }
}
