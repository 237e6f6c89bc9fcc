//! Document sources: where ingestion reads its corpus from.
//!
//! A [`DocumentSource`] lists candidate objects under a root and fetches one
//! object as an extracted [`Document`]. Listing applies the include/exclude
//! globs and drops objects whose format cannot be extracted, so everything
//! listed is worth fetching.
//!
//! | URL | Source |
//! |-----|--------|
//! | `s3://bucket/prefix` | [`S3Source`](crate::source_s3::S3Source) |
//! | `file:///abs/dir`, `./dir` | [`FsSource`](crate::source_fs::FsSource) |

use std::path::PathBuf;

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::IngestConfig;
use crate::extract::DocumentFormat;
use crate::models::Document;
use crate::source_fs::FsSource;
use crate::source_s3::{S3Location, S3Source};

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObject {
    /// Key relative to the source root (S3 object key, relative file path).
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// `s3://bucket` or `file:///abs/dir`; becomes every document's `docs_root`.
    fn docs_root(&self) -> &str;

    /// All ingestible objects, sorted by key.
    async fn list(&self) -> Result<Vec<SourceObject>>;

    /// Download and extract one object.
    async fn fetch(&self, object: &SourceObject) -> Result<Document>;
}

/// A parsed `docs_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocsUrl {
    S3(S3Location),
    Local(PathBuf),
}

impl DocsUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            bail!("docs_url is empty");
        }
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                bail!("docs_url has no bucket: {}", url);
            }
            return Ok(DocsUrl::S3(S3Location {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            }));
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(DocsUrl::Local(PathBuf::from(path)));
        }
        if url.contains("://") {
            bail!("unsupported docs_url scheme: {}", url);
        }
        Ok(DocsUrl::Local(PathBuf::from(url)))
    }
}

/// Open the source named by `docs_url` with the filters from `config`.
pub fn open_source(docs_url: &str, config: &IngestConfig) -> Result<Box<dyn DocumentSource>> {
    let filter = KeyFilter::new(&config.include_globs, &config.exclude_globs)?;
    match DocsUrl::parse(docs_url)? {
        DocsUrl::S3(location) => Ok(Box::new(S3Source::from_env(location, filter)?)),
        DocsUrl::Local(path) => Ok(Box::new(FsSource::new(path, filter)?)),
    }
}

/// Service tag for a key under a root: the key's parent folder, else the
/// root's own last path component.
pub fn service_for_key(docs_root: &str, key: &str) -> String {
    match key.rsplit_once('/') {
        Some((parent, _)) => parent.rsplit('/').next().unwrap_or(parent).to_string(),
        None => docs_root
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Include/exclude glob filter over relative keys.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl KeyFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
        excludes.extend(exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    /// Accept everything extractable.
    pub fn all() -> Result<Self> {
        Self::new(&["**/*".to_string()], &[])
    }

    /// Whether a relative key should be ingested.
    pub fn accepts(&self, key: &str) -> bool {
        if key.is_empty() || key.ends_with('/') {
            return false;
        }
        if self.exclude.is_match(key) || !self.include.is_match(key) {
            return false;
        }
        DocumentFormat::from_name(key).is_some()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
