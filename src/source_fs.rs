//! Local directory document source.
//!
//! Walks a root directory (`walkdir`), applying the same key filter as S3.
//! Documents get `docs_root = file://<absolute root>` and the path relative to
//! the root (always `/`-separated) as `doc_name`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use crate::extract;
use crate::models::Document;
use crate::source::{service_for_key, DocumentSource, KeyFilter, SourceObject};

pub struct FsSource {
    root: PathBuf,
    filter: KeyFilter,
    docs_root: String,
}

impl FsSource {
    pub fn new(root: impl AsRef<Path>, filter: KeyFilter) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            bail!("document root does not exist or is not a directory: {}", root.display());
        }
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        let docs_root = format!("file://{}", root.display());
        Ok(Self {
            root,
            filter,
            docs_root,
        })
    }
}

#[async_trait]
impl DocumentSource for FsSource {
    fn docs_root(&self) -> &str {
        &self.docs_root
    }

    async fn list(&self) -> Result<Vec<SourceObject>> {
        let root = self.root.clone();
        let filter = self.filter.clone();
        tokio::task::spawn_blocking(move || scan(&root, &filter)).await?
    }

    async fn fetch(&self, object: &SourceObject) -> Result<Document> {
        let path = self.root.join(&object.key);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = extract::extract_named(&object.key, &bytes)
            .with_context(|| format!("{}", path.display()))?;

        Ok(Document::new(
            self.docs_root.clone(),
            object.key.clone(),
            service_for_key(&self.docs_root, &object.key),
            text,
        ))
    }
}

fn scan(root: &Path, filter: &KeyFilter) -> Result<Vec<SourceObject>> {
    let mut objects = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !filter.accepts(&key) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        objects.push(SourceObject { key, size });
    }
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}
