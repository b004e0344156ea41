//! Markdown to sanitized HTML.
//!
//! Rendering is an ordered list of [`Stage`]s over a parsed [`Document`],
//! followed by serialization and string-level [`Rewrite`]s. Parsing never
//! fails; any later stage error aborts the whole render with [`RenderError`].

use std::ops::Range;

use pulldown_cmark::{Event, Options, Parser};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::toc::{HeadingNode, build_tree};

mod serialize;
mod stages;

pub use serialize::{ExternalLinks, LazyImages, Rewrite};
pub use stages::{CodeAnnotation, ExtendedSyntax, HeadingIds};

pub type StageError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("render stage `{stage}` failed: {source}")]
pub struct RenderError {
    pub stage: &'static str,
    #[source]
    pub source: StageError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub html: String,
    pub headings: Vec<HeadingNode>,
}

/// A parsed document flowing through the stages.
#[derive(Debug)]
pub struct Document<'a> {
    pub source: &'a str,
    pub nodes: Vec<Node<'a>>,
    /// Flat, document-ordered headings recorded by [`HeadingIds`].
    pub headings: Vec<HeadingNode>,
}

#[derive(Debug, Clone)]
pub enum Node<'a> {
    /// An event produced by the parser, with its byte span in the source.
    Source { event: Event<'a>, span: Range<usize> },
    /// Markup generated by a stage. The only node kind serialized verbatim.
    Markup(String),
}

impl Node<'_> {
    pub fn event(&self) -> Option<&Event<'_>> {
        match self {
            Node::Source { event, .. } => Some(event),
            Node::Markup(_) => None,
        }
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parser extensions this stage relies on.
    fn parse_options(&self) -> Options {
        Options::empty()
    }

    fn apply<'a>(&self, doc: Document<'a>) -> Result<Document<'a>, StageError>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    rewrites: Vec<Box<dyn Rewrite>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field(
                "rewrites",
                &self.rewrites.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard(None)
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The lesson pipeline: extended syntax, heading ids, code annotation,
    /// lazy images and external link hardening.
    pub fn standard(site_origin: Option<Url>) -> Self {
        Self::builder()
            .stage(ExtendedSyntax)
            .stage(HeadingIds)
            .stage(CodeAnnotation)
            .rewrite(LazyImages)
            .rewrite(ExternalLinks::new(site_origin))
            .build()
    }

    pub fn render(&self, source: &str) -> Result<RenderedDocument, RenderError> {
        let mut doc = self.parse(source);

        for stage in &self.stages {
            doc = stage.apply(doc).map_err(|source| RenderError {
                stage: stage.name(),
                source,
            })?;
        }

        let mut html = serialize::to_html(doc.nodes);
        for rewrite in &self.rewrites {
            html = rewrite.rewrite(html);
        }

        Ok(RenderedDocument {
            html,
            headings: build_tree(doc.headings),
        })
    }

    fn parse<'a>(&self, source: &'a str) -> Document<'a> {
        let options = self
            .stages
            .iter()
            .fold(Options::empty(), |acc, stage| acc | stage.parse_options());

        let nodes = Parser::new_ext(source, options)
            .into_offset_iter()
            .map(|(event, span)| Node::Source { event, span })
            .collect();

        Document {
            source,
            nodes,
            headings: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
    rewrites: Vec<Box<dyn Rewrite>>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn rewrite(mut self, rewrite: impl Rewrite + 'static) -> Self {
        self.rewrites.push(Box::new(rewrite));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            rewrites: self.rewrites,
        }
    }
}

/// Render with the standard pipeline and no known site origin.
pub fn render(source: &str) -> Result<RenderedDocument, RenderError> {
    Pipeline::default().render(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toc::extract_headings;

    const LESSON: &str = "# Joins\n\
\n\
Intro with <b>inline</b> html.\n\
\n\
## Inner joins\n\
\n\
```sql\n\
SELECT 1;\n\
```\n\
\n\
### Overview\n\
\n\
| a | b |\n\
|---|---|\n\
| 1 | 2 |\n\
\n\
## Outer joins\n\
\n\
### Overview\n\
\n\
- [x] done\n\
- [ ] todo\n\
\n\
~~gone~~ ![diagram](/img/joins.png) [docs](https://www.postgresql.org/docs/)\n";

    fn flatten(nodes: &[HeadingNode], out: &mut Vec<(u8, String)>) {
        for node in nodes {
            out.push((node.depth, node.id.clone()));
            flatten(&node.children, out);
        }
    }

    #[test]
    fn render_is_idempotent() -> anyhow::Result<()> {
        let first = render(LESSON)?;
        let second = render(LESSON)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn pipeline_ids_match_extracted_ids() -> anyhow::Result<()> {
        let doc = render(LESSON)?;
        let mut rendered = Vec::new();
        flatten(&doc.headings, &mut rendered);

        let extracted: Vec<_> = extract_headings(LESSON)
            .into_iter()
            .map(|h| (h.depth, h.id))
            .collect();
        assert_eq!(rendered, extracted);
        assert_eq!(
            extracted.iter().map(|(_, id)| id.as_str()).collect::<Vec<_>>(),
            vec!["inner-joins", "overview", "outer-joins", "overview-1"]
        );

        for (_, id) in &extracted {
            assert!(doc.html.contains(&format!("id=\"{id}\"")), "missing {id}");
            assert!(doc.html.contains(&format!("href=\"#{id}\"")), "missing anchor {id}");
        }
        Ok(())
    }

    #[test]
    fn ids_match_across_reference_links_and_html_blocks() -> anyhow::Result<()> {
        let source = "## See [docs][ref]\n\n<div>\n## raw\n</div>\n\n## Use [cargo]\n\n\
> ## quoted\n\n## ~~Old~~ `new`\n\n[ref]: https://x.test\n[cargo]: https://x.test/cargo\n";
        let doc = render(source)?;
        let mut rendered = Vec::new();
        flatten(&doc.headings, &mut rendered);

        let extracted: Vec<_> = extract_headings(source)
            .into_iter()
            .map(|h| (h.depth, h.id))
            .collect();
        assert_eq!(rendered, extracted);
        assert_eq!(
            extracted.iter().map(|(_, id)| id.as_str()).collect::<Vec<_>>(),
            vec!["see-docs", "use-cargo", "old-new"]
        );
        Ok(())
    }

    #[test]
    fn headings_form_a_tree() -> anyhow::Result<()> {
        let doc = render(LESSON)?;
        assert_eq!(doc.headings.len(), 2);
        assert_eq!(doc.headings[0].children[0].id, "overview");
        assert_eq!(doc.headings[1].children[0].id, "overview-1");
        Ok(())
    }

    #[test]
    fn raw_html_is_escaped() -> anyhow::Result<()> {
        let doc = render("before\n\n<script>alert(1)</script>\n\nafter <img src=x onerror=alert(1)>\n")?;
        assert!(!doc.html.contains("<script"), "{}", doc.html);
        assert!(doc.html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!doc.html.contains("<img src=x"));
        Ok(())
    }

    #[test]
    fn extended_syntax_is_rendered() -> anyhow::Result<()> {
        let doc = render(LESSON)?;
        assert!(doc.html.contains("<del>gone</del>"));
        assert!(doc.html.contains("<div class=\"table-wrapper\"><table>"));
        assert!(doc.html.contains("class=\"task-list-item\""));
        assert!(doc.html.contains("checked"));
        Ok(())
    }

    #[test]
    fn sql_fence_is_annotated_and_copyable() -> anyhow::Result<()> {
        let doc = render("```sql\nSELECT 1;\n```\n")?;
        assert!(doc.html.contains("data-language=\"sql\""), "{}", doc.html);
        assert!(doc.html.contains("data-copy=\"true\""));
        assert!(doc.html.contains("<code class=\"language-sql\">SELECT 1;"));
        Ok(())
    }

    #[test]
    fn post_processing_applies() -> anyhow::Result<()> {
        let doc = render(LESSON)?;
        assert!(doc.html.contains("<img loading=\"lazy\" src=\"/img/joins.png\""));
        assert!(doc.html.contains(
            "href=\"https://www.postgresql.org/docs/\" target=\"_blank\" rel=\"noopener noreferrer\""
        ));
        Ok(())
    }

    #[test]
    fn malformed_markdown_still_renders() -> anyhow::Result<()> {
        let doc = render("## Unclosed [link(\n\n```\nno end\n| a |\n*emph")?;
        assert!(doc.html.contains("<pre>"));
        assert_eq!(doc.headings.len(), 1);
        Ok(())
    }

    struct Exploding;

    impl Stage for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn apply<'a>(&self, _doc: Document<'a>) -> Result<Document<'a>, StageError> {
            Err("boom".into())
        }
    }

    #[test]
    fn stage_failure_becomes_render_error() {
        let pipeline = Pipeline::builder()
            .stage(HeadingIds)
            .stage(Exploding)
            .build();
        let err = pipeline.render("## Hi\n").unwrap_err();
        assert_eq!(err.stage, "exploding");
        assert_eq!(err.to_string(), "render stage `exploding` failed: boom");
    }
}
