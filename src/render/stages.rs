use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Tag, TagEnd};

use crate::render::{Document, Node, Stage, StageError};
use crate::toc::HeadingCollector;

/// Tables, strikethrough and task lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedSyntax;

impl ExtendedSyntax {
    pub const OPTIONS: Options = Options::ENABLE_TABLES
        .union(Options::ENABLE_STRIKETHROUGH)
        .union(Options::ENABLE_TASKLISTS);
}

impl Stage for ExtendedSyntax {
    fn name(&self) -> &'static str {
        "extended-syntax"
    }

    fn parse_options(&self) -> Options {
        Self::OPTIONS
    }

    fn apply<'a>(&self, mut doc: Document<'a>) -> Result<Document<'a>, StageError> {
        let mut nodes = Vec::with_capacity(doc.nodes.len() + 8);
        // Output positions of open list items, innermost last.
        let mut open_items: Vec<usize> = Vec::new();

        for node in doc.nodes.drain(..) {
            match node.event() {
                Some(Event::Start(Tag::Table(_))) => {
                    nodes.push(Node::Markup("<div class=\"table-wrapper\">".to_owned()));
                    nodes.push(node);
                }
                Some(Event::End(TagEnd::Table)) => {
                    nodes.push(node);
                    nodes.push(Node::Markup("</div>\n".to_owned()));
                }
                Some(Event::Start(Tag::Item)) => {
                    open_items.push(nodes.len());
                    nodes.push(node);
                }
                Some(Event::End(TagEnd::Item)) => {
                    open_items.pop();
                    nodes.push(node);
                }
                Some(Event::TaskListMarker(checked)) => {
                    let checked = *checked;
                    let item = open_items
                        .last()
                        .copied()
                        .ok_or("task list marker outside of a list item")?;
                    nodes[item] = Node::Markup("<li class=\"task-list-item\">".to_owned());
                    nodes.push(Node::Markup(format!(
                        "<input type=\"checkbox\" class=\"task-list-checkbox\" disabled{} /> ",
                        if checked { " checked" } else { "" }
                    )));
                }
                _ => nodes.push(node),
            }
        }

        doc.nodes = nodes;
        Ok(doc)
    }
}

/// Assigns ids and anchor links to depth 2..=4 ATX headings.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadingIds;

impl Stage for HeadingIds {
    fn name(&self) -> &'static str {
        "heading-ids"
    }

    fn apply<'a>(&self, mut doc: Document<'a>) -> Result<Document<'a>, StageError> {
        let source = doc.source;
        let mut collector = HeadingCollector::default();
        let mut nodes: Vec<Node<'a>> = Vec::with_capacity(doc.nodes.len());
        let mut open_index: Option<usize> = None;

        for node in doc.nodes.drain(..) {
            match &node {
                Node::Source {
                    event: Event::Start(Tag::Heading { level, .. }),
                    span,
                } => {
                    if collector.is_open() {
                        return Err("nested heading".into());
                    }
                    if collector.start(source, *level, span.start) {
                        open_index = Some(nodes.len());
                    }
                    nodes.push(node);
                }
                Node::Source {
                    event: Event::End(TagEnd::Heading(_)),
                    ..
                } => {
                    if let Some(heading) = collector.finish() {
                        let index = open_index.take().ok_or("heading end without start")?;
                        set_heading_id(&mut nodes[index], &heading.id)?;
                        nodes.push(Node::Markup(format!(
                            "<a class=\"heading-anchor\" href=\"#{}\" aria-label=\"Link to this section\">#</a>",
                            heading.id
                        )));
                        doc.headings.push(heading);
                    }
                    nodes.push(node);
                }
                Node::Source { event, .. } => {
                    collector.text(event);
                    nodes.push(node);
                }
                Node::Markup(_) => nodes.push(node),
            }
        }

        if collector.is_open() {
            return Err("heading without end".into());
        }

        doc.nodes = nodes;
        Ok(doc)
    }
}

fn set_heading_id(node: &mut Node<'_>, id: &str) -> Result<(), StageError> {
    match node {
        Node::Source {
            event: Event::Start(Tag::Heading { id: slot, .. }),
            ..
        } => {
            *slot = Some(CowStr::from(id.to_owned()));
            Ok(())
        }
        _ => Err("heading id target is not a heading".into()),
    }
}

/// Language label and copy affordance for fenced code blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeAnnotation;

pub const PLAIN_TEXT_LANGUAGE: &str = "text";
const PLAIN_TEXT_LABEL: &str = "Plain text";

impl Stage for CodeAnnotation {
    fn name(&self) -> &'static str {
        "code-annotation"
    }

    fn apply<'a>(&self, mut doc: Document<'a>) -> Result<Document<'a>, StageError> {
        let mut nodes = Vec::with_capacity(doc.nodes.len() + 8);
        let mut in_fence = false;

        for node in doc.nodes.drain(..) {
            match node.event() {
                Some(Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info)))) => {
                    if in_fence {
                        return Err("nested fenced code block".into());
                    }
                    in_fence = true;
                    let (language, label) = language_label(info);
                    nodes.push(Node::Markup(format!(
                        "<div class=\"code-block\" data-language=\"{language}\" data-copy=\"true\">\
<div class=\"code-block-header\"><span class=\"code-block-language\">{label}</span>\
<button type=\"button\" class=\"code-block-copy\" aria-label=\"Copy code\">Copy</button></div>"
                    )));
                    nodes.push(node);
                }
                Some(Event::End(TagEnd::CodeBlock)) if in_fence => {
                    in_fence = false;
                    nodes.push(node);
                    nodes.push(Node::Markup("</div>\n".to_owned()));
                }
                _ => nodes.push(node),
            }
        }

        doc.nodes = nodes;
        Ok(doc)
    }
}

/// `(data-language, display label)` for a fence info string.
pub fn language_label(info: &str) -> (&'static str, &'static str) {
    let declared = info
        .split(|c: char| c.is_whitespace() || c == ',' || c == '{')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    KNOWN_LANGUAGES
        .iter()
        .find(|(name, _)| *name == declared)
        .copied()
        .unwrap_or((PLAIN_TEXT_LANGUAGE, PLAIN_TEXT_LABEL))
}

const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("bash", "Bash"),
    ("c", "C"),
    ("cpp", "C++"),
    ("csharp", "C#"),
    ("css", "CSS"),
    ("diff", "Diff"),
    ("dockerfile", "Dockerfile"),
    ("go", "Go"),
    ("graphql", "GraphQL"),
    ("html", "HTML"),
    ("java", "Java"),
    ("javascript", "JavaScript"),
    ("js", "JavaScript"),
    ("json", "JSON"),
    ("jsx", "JSX"),
    ("kotlin", "Kotlin"),
    ("markdown", "Markdown"),
    ("md", "Markdown"),
    ("php", "PHP"),
    ("plpgsql", "PL/pgSQL"),
    ("psql", "psql"),
    ("python", "Python"),
    ("py", "Python"),
    ("ruby", "Ruby"),
    ("rust", "Rust"),
    ("rs", "Rust"),
    ("sh", "Shell"),
    ("shell", "Shell"),
    ("sql", "SQL"),
    ("swift", "Swift"),
    ("text", PLAIN_TEXT_LABEL),
    ("toml", "TOML"),
    ("ts", "TypeScript"),
    ("tsx", "TSX"),
    ("typescript", "TypeScript"),
    ("xml", "XML"),
    ("yaml", "YAML"),
    ("yml", "YAML"),
];
