//! File store for rendered plan documents.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use periodize_db::models::Discipline;

/// Persists document bytes and hands back an opaque location.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn save(&self, discipline: Discipline, plan_id: &str, bytes: &[u8]) -> Result<String>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn FileStore) {}
};

/// Stores documents on the local filesystem at
/// `<root>/<discipline>/<plan_id>.txt`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, discipline: Discipline, plan_id: &str) -> PathBuf {
        self.root
            .join(discipline.as_str())
            .join(format!("{plan_id}.txt"))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, discipline: Discipline, plan_id: &str, bytes: &[u8]) -> Result<String> {
        // Plan ids end up in a path.
        if plan_id.is_empty()
            || !plan_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("plan id {plan_id:?} is not usable as a file name");
        }

        let path = self.path_for(discipline, plan_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "document stored");
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_under_discipline_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        let location = store
            .save(Discipline::Cycling, "P1", b"week 1 ...")
            .await
            .unwrap();

        let expected = dir.path().join("cycling").join("P1.txt");
        assert_eq!(location, expected.to_string_lossy());
        assert_eq!(std::fs::read(&expected).unwrap(), b"week 1 ...");
    }

    #[tokio::test]
    async fn overwrites_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        store.save(Discipline::General, "P1", b"first").await.unwrap();
        let location = store.save(Discipline::General, "P1", b"second").await.unwrap();
        assert_eq!(std::fs::read(location).unwrap(), b"second");
    }

    #[tokio::test]
    async fn rejects_path_like_plan_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        assert!(store.save(Discipline::General, "../etc", b"x").await.is_err());
        assert!(store.save(Discipline::General, "", b"x").await.is_err());
    }
}
