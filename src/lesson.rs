use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, CacheExt as _};
use crate::error::{Error, Loaded, Result};
use crate::fetch::{FetchError, Fetcher};
use crate::fetch_context::{FetchContext, InflightRegistry};
use crate::formats::{LessonContent, LessonDescriptor};
use crate::render::{Pipeline, RenderError};
use crate::toc::{build_tree, extract_headings, lines_outside_fences};

pub const LESSON_TTL: Duration = Duration::from_secs(30 * 60);

const WORDS_PER_MINUTE: usize = 200;

/// Stage name reported when the outline and the rendered ids disagree.
pub const OUTLINE_CHECK: &str = "outline-check";

pub fn lesson_cache_key(slug: &str) -> String {
    format!("lesson:{slug}")
}

pub fn source_cache_key(slug: &str) -> String {
    format!("lesson-source:{slug}")
}

pub struct LessonLoader {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn Cache>,
    pipeline: Pipeline,
    inflight: InflightRegistry,
}

impl LessonLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<dyn Cache>, pipeline: Pipeline) -> Self {
        Self {
            fetcher,
            cache,
            pipeline,
            inflight: InflightRegistry::new(),
        }
    }

    /// Load, outline and render one lesson.
    ///
    /// A later call for the same slug supersedes this one, which then
    /// resolves to [`Loaded::Cancelled`] without touching the cache.
    pub async fn fetch_lesson(
        &self,
        descriptor: &LessonDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Loaded<LessonContent>> {
        let key = lesson_cache_key(&descriptor.slug);
        if let Some(content) = self.cache.get_as::<LessonContent>(&key) {
            tracing::debug!(slug = %descriptor.slug, "lesson cache hit");
            return Ok(Loaded::Ready(content));
        }

        let ctx = self.inflight.begin(&key, cancel);
        let Loaded::Ready(source) = self.load_source(descriptor, &ctx).await? else {
            return Ok(Loaded::Cancelled);
        };

        let content = self.assemble(descriptor, source)?;
        if ctx.is_cancelled() {
            return Ok(Loaded::Cancelled);
        }

        self.cache.set_as(&key, &content, LESSON_TTL);
        tracing::info!(
            slug = %descriptor.slug,
            headings = content.headings.len(),
            words = content.word_count,
            "lesson loaded"
        );
        Ok(Loaded::Ready(content))
    }

    async fn load_source(
        &self,
        descriptor: &LessonDescriptor,
        ctx: &FetchContext<'_>,
    ) -> Result<Loaded<String>> {
        let key = source_cache_key(&descriptor.slug);
        if let Some(source) = self.cache.get_as::<String>(&key) {
            tracing::debug!(slug = %descriptor.slug, "lesson source cache hit; re-rendering");
            return Ok(Loaded::Ready(source));
        }

        let source = match self
            .fetcher
            .fetch_text(&descriptor.source_path, ctx.token())
            .await
        {
            Ok(source) => source,
            Err(FetchError::Cancelled) => return Ok(Loaded::Cancelled),
            Err(err) => {
                return Err(Error::network(
                    format!("lesson \"{}\" ({})", descriptor.title, descriptor.source_path),
                    err,
                ));
            }
        };
        if ctx.is_cancelled() {
            return Ok(Loaded::Cancelled);
        }

        self.cache.set_as(&key, &source, LESSON_TTL);
        Ok(Loaded::Ready(source))
    }

    fn assemble(&self, descriptor: &LessonDescriptor, source: String) -> Result<LessonContent> {
        let resource = || format!("lesson \"{}\"", descriptor.title);
        let headings = build_tree(extract_headings(&source));
        let document = self
            .pipeline
            .render(&source)
            .map_err(|source| Error::Render {
                resource: resource(),
                source,
            })?;
        // Every outline entry must link to an id present in the HTML.
        if document.headings != headings {
            return Err(Error::Render {
                resource: resource(),
                source: RenderError {
                    stage: OUTLINE_CHECK,
                    source: "rendered heading ids differ from the extracted outline".into(),
                },
            });
        }

        Ok(LessonContent {
            word_count: word_count(&source),
            source_text: source,
            headings,
            document,
        })
    }
}

/// Words of prose, ignoring fenced code.
pub fn word_count(source: &str) -> usize {
    lines_outside_fences(source)
        .map(|line| {
            line.split_whitespace()
                .filter(|word| word.chars().any(char::is_alphanumeric))
                .count()
        })
        .sum()
}

/// The manifest estimate, or one derived from the word count.
pub fn reading_minutes(descriptor: &LessonDescriptor, content: &LessonContent) -> u32 {
    if let Some(minutes) = descriptor.estimated_minutes {
        return minutes;
    }
    let minutes = content.word_count.div_ceil(WORDS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}
