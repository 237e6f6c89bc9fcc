//! Amazon S3 document source.
//!
//! Lists and downloads objects with the S3 REST API (`ListObjectsV2`,
//! `GetObject`) signed with SigV4 (see [`crate::aws`]). Pagination follows
//! `NextContinuationToken`.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`: credentials
//! - `AWS_REGION` / `AWS_DEFAULT_REGION`: bucket region (default `us-east-1`)
//! - `AWS_ENDPOINT_URL_S3`: custom endpoint (MinIO, LocalStack), path-style

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use tracing::debug;

use crate::aws::{self, AwsCredentials, SigningRequest};
use crate::extract;
use crate::models::Document;
use crate::source::{service_for_key, DocumentSource, KeyFilter, SourceObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    /// Key prefix, possibly empty.
    pub prefix: String,
}

pub struct S3Source {
    location: S3Location,
    region: String,
    /// Custom endpoint as `(scheme, host)`; path-style addressing when set.
    endpoint: Option<(String, String)>,
    creds: AwsCredentials,
    filter: KeyFilter,
    client: reqwest::Client,
    docs_root: String,
}

impl S3Source {
    pub fn from_env(location: S3Location, filter: KeyFilter) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| "us-east-1".to_string());
        let endpoint = std::env::var("AWS_ENDPOINT_URL_S3").ok();
        Self::new(location, region, endpoint.as_deref(), creds, filter)
    }

    pub fn new(
        location: S3Location,
        region: String,
        endpoint_url: Option<&str>,
        creds: AwsCredentials,
        filter: KeyFilter,
    ) -> Result<Self> {
        let endpoint = endpoint_url.map(|url| {
            let scheme = if url.starts_with("http://") { "http" } else { "https" };
            let host = url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string();
            (scheme.to_string(), host)
        });
        let docs_root = format!("s3://{}", location.bucket);
        Ok(Self {
            location,
            region,
            endpoint,
            creds,
            filter,
            client: reqwest::Client::new(),
            docs_root,
        })
    }

    fn host(&self) -> String {
        match self.endpoint {
            Some((_, ref host)) => host.clone(),
            None => format!("{}.s3.{}.amazonaws.com", self.location.bucket, self.region),
        }
    }

    fn scheme(&self) -> &str {
        match self.endpoint {
            Some((ref scheme, _)) => scheme,
            None => "https",
        }
    }

    /// URL path for a key (or `/` for bucket operations).
    fn path_for(&self, key: Option<&str>) -> String {
        let key_path = key.map(aws::encode_path).unwrap_or_default();
        match self.endpoint {
            Some(_) => format!("/{}/{}", self.location.bucket, key_path),
            None => format!("/{}", key_path),
        }
    }

    async fn signed_get(&self, path: &str, query: &[(String, String)]) -> Result<reqwest::Response> {
        let host = self.host();
        let headers = aws::sign(
            &self.creds,
            &SigningRequest {
                method: "GET",
                host: &host,
                path,
                query,
                payload: b"",
                headers: &[],
                region: &self.region,
                service: "s3",
            },
            Utc::now(),
        )?;

        let mut url = format!("{}://{}{}", self.scheme(), host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&aws::canonical_query(query));
        }

        let mut req = self.client.get(&url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        Ok(req.send().await?)
    }

    async fn list_page(&self, token: Option<&str>) -> Result<ListPage> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !self.location.prefix.is_empty() {
            query.push(("prefix".to_string(), self.location.prefix.clone()));
        }
        if let Some(token) = token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let path = self.path_for(None);
        let resp = self.signed_get(&path, &query).await.with_context(|| {
            format!(
                "Failed to list S3 objects in s3://{}/{}",
                self.location.bucket, self.location.prefix
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 ListObjectsV2 failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        parse_list_objects(&resp.text().await?)
    }
}

#[async_trait]
impl DocumentSource for S3Source {
    fn docs_root(&self) -> &str {
        &self.docs_root
    }

    async fn list(&self) -> Result<Vec<SourceObject>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(token.as_deref()).await?;
            debug!(
                bucket = %self.location.bucket,
                keys = page.objects.len(),
                truncated = page.is_truncated,
                "listed S3 page"
            );
            objects.extend(page.objects.into_iter().filter(|o| self.filter.accepts(&o.key)));

            match (page.is_truncated, page.next_token) {
                (true, Some(next)) => token = Some(next),
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn fetch(&self, object: &SourceObject) -> Result<Document> {
        let path = self.path_for(Some(&object.key));
        let resp = self.signed_get(&path, &[]).await.with_context(|| {
            format!("Failed to get s3://{}/{}", self.location.bucket, object.key)
        })?;

        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                object.key
            );
        }

        let bytes = resp.bytes().await?;
        let text = extract::extract_named(&object.key, &bytes)
            .with_context(|| format!("s3://{}/{}", self.location.bucket, object.key))?;

        Ok(Document::new(
            self.docs_root.clone(),
            object.key.clone(),
            service_for_key(&self.docs_root, &object.key),
            text,
        ))
    }
}

#[derive(Debug, Default, PartialEq)]
struct ListPage {
    objects: Vec<SourceObject>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML response.
fn parse_list_objects(xml: &str) -> Result<ListPage> {
    let mut page = ListPage::default();
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut key: Option<String> = None;
    let mut size: u64 = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Contents" {
                    key = None;
                    size = 0;
                }
                path.push(name);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    if let Some(k) = key.take() {
                        page.objects.push(SourceObject { key: k, size });
                    }
                }
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape()?.into_owned();
                let depth = path.len();
                let current = path.last().map(String::as_str);
                let parent = depth
                    .checked_sub(2)
                    .and_then(|i| path.get(i))
                    .map(String::as_str);
                match (parent, current) {
                    (Some("Contents"), Some("Key")) => key = Some(value),
                    (Some("Contents"), Some("Size")) => size = value.trim().parse().unwrap_or(0),
                    (Some("ListBucketResult"), Some("IsTruncated")) => {
                        page.is_truncated = value.trim() == "true"
                    }
                    (Some("ListBucketResult"), Some("NextContinuationToken")) => {
                        page.next_token = Some(value)
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("invalid ListObjectsV2 response: {}", e),
            _ => {}
        }
    }

    Ok(page)
}
