use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, CacheExt as _};
use crate::error::{Error, Loaded, Result};
use crate::fetch::{FetchError, Fetcher};
use crate::fetch_context::InflightRegistry;
use crate::formats::ManifestRecord;

pub const DEFAULT_MANIFEST_PATH: &str = "/content/manifest.json";
pub const MANIFEST_CACHE_KEY: &str = "manifest";
pub const MANIFEST_TTL: Duration = Duration::from_secs(30 * 60);

pub struct ManifestLoader {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn Cache>,
    path: String,
    inflight: InflightRegistry,
}

impl ManifestLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<dyn Cache>) -> Self {
        Self::with_path(fetcher, cache, DEFAULT_MANIFEST_PATH)
    }

    pub fn with_path(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn Cache>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            path: path.into(),
            inflight: InflightRegistry::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn fetch_manifest(&self, cancel: &CancellationToken) -> Result<Loaded<ManifestRecord>> {
        if let Some(manifest) = self.cache.get_as::<ManifestRecord>(MANIFEST_CACHE_KEY) {
            tracing::debug!("manifest cache hit");
            return Ok(Loaded::Ready(manifest));
        }

        let ctx = self.inflight.begin(MANIFEST_CACHE_KEY, cancel);
        let body = match self.fetcher.fetch_text(&self.path, ctx.token()).await {
            Ok(body) => body,
            Err(FetchError::Cancelled) => return Ok(Loaded::Cancelled),
            Err(err) => return Err(Error::network(&self.path, err)),
        };
        if ctx.is_cancelled() {
            return Ok(Loaded::Cancelled);
        }

        let manifest = parse_manifest(&self.path, &body)?;
        self.cache
            .set_as(MANIFEST_CACHE_KEY, &manifest, MANIFEST_TTL);
        tracing::info!(
            path = %self.path,
            lessons = manifest.lessons.len(),
            "manifest loaded"
        );

        Ok(Loaded::Ready(manifest))
    }

    /// Drop every cached entry (manifest and lessons share the cache).
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}

/// Parse and validate a manifest payload. `resource` names it in errors.
pub fn parse_manifest(resource: &str, body: &str) -> Result<ManifestRecord> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|err| Error::Parse {
        resource: resource.to_owned(),
        message: err.to_string(),
    })?;

    let invalid = |problems: Vec<String>| Error::Validation {
        resource: resource.to_owned(),
        problems,
    };

    let mut manifest: ManifestRecord =
        serde_json::from_value(value).map_err(|err| invalid(vec![err.to_string()]))?;

    let problems = validate(&manifest);
    if !problems.is_empty() {
        return Err(invalid(problems));
    }

    manifest.lessons.sort_by_key(|lesson| lesson.order);
    Ok(manifest)
}

fn validate(manifest: &ManifestRecord) -> Vec<String> {
    let mut problems = Vec::new();

    let course = &manifest.course;
    for (field, value) in [
        ("course.title", &course.title),
        ("course.description", &course.description),
    ] {
        if value.trim().is_empty() {
            problems.push(format!("{field} is empty"));
        }
    }

    let mut slugs = HashSet::new();
    let mut orders = HashSet::new();
    for (idx, lesson) in manifest.lessons.iter().enumerate() {
        let at = format!("lessons[{idx}]");
        if lesson.slug.is_empty() {
            problems.push(format!("{at}.slug is empty"));
        } else if lesson
            .slug
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '#' || c == '?')
        {
            problems.push(format!("{at}.slug {:?} is not a path segment", lesson.slug));
        }
        if lesson.title.trim().is_empty() {
            problems.push(format!("{at}.title is empty"));
        }
        if lesson.source_path.trim().is_empty() {
            problems.push(format!("{at}.sourcePath is empty"));
        }
        if !lesson.slug.is_empty() && !slugs.insert(lesson.slug.as_str()) {
            problems.push(format!("{at}.slug {:?} is duplicated", lesson.slug));
        }
        if !orders.insert(lesson.order) {
            problems.push(format!("{at}.order {} is duplicated", lesson.order));
        }
    }

    problems
}
