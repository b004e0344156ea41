use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::{LessonArgs, ManifestArgs, OutputFormat, RenderArgs, SiteArgs};
use crate::client::ContentClient;
use crate::config::{Config, parse_base_url};
use crate::error::Loaded;
use crate::formats::{LessonContent, LessonDescriptor};
use crate::lesson::reading_minutes;
use crate::render::{Pipeline, RenderedDocument};
use crate::toc::HeadingNode;

pub async fn manifest(args: ManifestArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let client = client_for(&args.site)?;
    let manifest = match client.manifest(cancel).await? {
        Loaded::Ready(manifest) => manifest,
        Loaded::Cancelled => anyhow::bail!("interrupted"),
    };
    write_json(&manifest)
}

pub async fn lesson(args: LessonArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let client = client_for(&args.site)?;
    let (descriptor, content) = match client.lesson_by_slug(&args.slug, cancel).await? {
        Loaded::Ready(loaded) => loaded,
        Loaded::Cancelled => anyhow::bail!("interrupted"),
    };

    match args.format {
        OutputFormat::Json => write_json(&LessonView::new(&descriptor, &content)),
        OutputFormat::Html => write_text(&content.document.html),
        OutputFormat::Toc => write_text(&outline(&content.headings)),
    }
}

pub fn render(args: RenderArgs) -> anyhow::Result<()> {
    let path = PathBuf::from(&args.file);
    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("read markdown: {}", path.display()))?;

    let site_origin = args
        .site_origin
        .as_deref()
        .map(parse_base_url)
        .transpose()
        .context("parse --site-origin")?;
    let document = Pipeline::standard(site_origin)
        .render(&source)
        .with_context(|| format!("render {}", path.display()))?;

    match args.format {
        OutputFormat::Json => write_json(&document),
        OutputFormat::Html => write_text(&document.html),
        OutputFormat::Toc => write_text(&outline(&document.headings)),
    }
}

fn client_for(site: &SiteArgs) -> anyhow::Result<ContentClient> {
    let mut config = Config::from_env(site.base_url.as_deref()).context("load config")?;
    if let Some(path) = &site.manifest_path {
        config.manifest_path = path.clone();
    }
    if let Some(dir) = &site.cache_dir {
        config.cache_dir = Some(PathBuf::from(dir));
    }
    if let Some(secs) = site.timeout_secs {
        config.fetch_timeout = Duration::from_secs(secs.max(1));
    }
    ContentClient::from_config(&config).context("build content client")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LessonView<'a> {
    lesson: &'a LessonDescriptor,
    reading_minutes: u32,
    word_count: usize,
    headings: &'a [HeadingNode],
    document: &'a RenderedDocument,
}

impl<'a> LessonView<'a> {
    fn new(descriptor: &'a LessonDescriptor, content: &'a LessonContent) -> Self {
        Self {
            lesson: descriptor,
            reading_minutes: reading_minutes(descriptor, content),
            word_count: content.word_count,
            headings: &content.headings,
            document: &content.document,
        }
    }
}

/// Indented `- text (#id)` lines, two spaces per level below the roots.
pub fn outline(headings: &[HeadingNode]) -> String {
    fn walk(nodes: &[HeadingNode], level: usize, out: &mut String) {
        for node in nodes {
            out.push_str(&"  ".repeat(level));
            out.push_str(&format!("- {} (#{})\n", node.text, node.id));
            walk(&node.children, level + 1, out);
        }
    }

    let mut out = String::new();
    walk(headings, 0, &mut out);
    out
}

fn write_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("write json")?;
    stdout.write_all(b"\n").context("write newline")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

fn write_text(text: &str) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes()).context("write output")?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n").context("write newline")?;
    }
    stdout.flush().context("flush stdout")?;
    Ok(())
}
