use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, FsBackend, MemoryCache, PersistentCache, SystemClock};
use crate::config::Config;
use crate::error::{Error, Loaded, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::formats::{LessonContent, LessonDescriptor, ManifestRecord};
use crate::lesson::LessonLoader;
use crate::manifest::ManifestLoader;
use crate::render::Pipeline;

/// Manifest and lesson loaders sharing one fetcher and one cache.
pub struct ContentClient {
    manifest: ManifestLoader,
    lessons: LessonLoader,
    cache: Arc<dyn Cache>,
}

impl ContentClient {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn Cache>,
        manifest_path: impl Into<String>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            manifest: ManifestLoader::with_path(
                Arc::clone(&fetcher),
                Arc::clone(&cache),
                manifest_path,
            ),
            lessons: LessonLoader::new(fetcher, Arc::clone(&cache), pipeline),
            cache,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(config.base_url.clone(), config.fetch_timeout)?;
        let clock = Arc::new(SystemClock);
        let cache: Arc<dyn Cache> = match &config.cache_dir {
            Some(dir) => Arc::new(PersistentCache::new(FsBackend::new(dir), clock)),
            None => Arc::new(MemoryCache::new(clock)),
        };
        let pipeline = Pipeline::standard(Some(config.base_url.clone()));

        tracing::debug!(
            base_url = %config.base_url,
            manifest = %config.manifest_path,
            cache_dir = ?config.cache_dir,
            "content client configured"
        );
        Ok(Self::new(
            Arc::new(fetcher),
            cache,
            config.manifest_path.clone(),
            pipeline,
        ))
    }

    pub async fn manifest(&self, cancel: &CancellationToken) -> Result<Loaded<ManifestRecord>> {
        self.manifest.fetch_manifest(cancel).await
    }

    pub async fn lesson(
        &self,
        descriptor: &LessonDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Loaded<LessonContent>> {
        self.lessons.fetch_lesson(descriptor, cancel).await
    }

    /// Resolve `slug` through the manifest, then load the lesson.
    pub async fn lesson_by_slug(
        &self,
        slug: &str,
        cancel: &CancellationToken,
    ) -> Result<Loaded<(LessonDescriptor, LessonContent)>> {
        let Loaded::Ready(manifest) = self.manifest(cancel).await? else {
            return Ok(Loaded::Cancelled);
        };
        let descriptor = manifest
            .lesson(slug)
            .cloned()
            .ok_or_else(|| Error::UnknownLesson {
                slug: slug.to_owned(),
            })?;

        Ok(match self.lesson(&descriptor, cancel).await? {
            Loaded::Ready(content) => Loaded::Ready((descriptor, content)),
            Loaded::Cancelled => Loaded::Cancelled,
        })
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
