use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

use crate::render::ExtendedSyntax;
use crate::slug::{SlugRegistry, push_plain_text};

pub const MIN_DEPTH: u8 = 2;
pub const MAX_DEPTH: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingNode {
    pub id: String,
    pub depth: u8,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HeadingNode>,
}

impl HeadingNode {
    pub fn new(id: impl Into<String>, depth: u8, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depth,
            text: text.into(),
            children: Vec::new(),
        }
    }
}

/// Flat, document-ordered list of depth 2..=4 ATX headings outside code fences.
///
/// Headings come from the same parser events the renderer sees, so reference
/// links, raw HTML blocks and fences resolve the same way on both sides.
pub fn extract_headings(source: &str) -> Vec<HeadingNode> {
    let mut collector = HeadingCollector::default();
    let mut headings = Vec::new();

    for (event, span) in Parser::new_ext(source, ExtendedSyntax::OPTIONS).into_offset_iter() {
        match &event {
            Event::Start(Tag::Heading { level, .. }) => {
                collector.start(source, *level, span.start);
            }
            Event::End(TagEnd::Heading(_)) => headings.extend(collector.finish()),
            _ => collector.text(&event),
        }
    }

    headings
}

/// Accumulates outlined headings from a parser event stream and assigns
/// their ids. Used by [`extract_headings`] and the `HeadingIds` render stage.
#[derive(Debug, Default)]
pub(crate) struct HeadingCollector {
    ids: SlugRegistry,
    open: Option<(u8, String)>,
}

impl HeadingCollector {
    /// Opens a heading when it is outlined; returns whether it was.
    pub(crate) fn start(&mut self, source: &str, level: HeadingLevel, span_start: usize) -> bool {
        let depth = level as u8;
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&depth) || !is_atx_line(source, span_start) {
            return false;
        }
        self.open = Some((depth, String::new()));
        true
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub(crate) fn text(&mut self, event: &Event<'_>) {
        if let Some((_, text)) = self.open.as_mut() {
            push_plain_text(text, event);
        }
    }

    /// Closes the open heading, if any, and assigns its id.
    pub(crate) fn finish(&mut self) -> Option<HeadingNode> {
        let (depth, text) = self.open.take()?;
        let text = text.trim().to_owned();
        let id = self.ids.assign(&text);
        Some(HeadingNode::new(id, depth, text))
    }
}

// Setext headings and headings nested in containers (block quotes, list
// items) stay out of the outline: only `#` lines with at most three spaces
// of indent count.
fn is_atx_line(source: &str, start: usize) -> bool {
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &source[line_start..start];
    let rest = &source[start..];
    let marker = rest.trim_start_matches(' ');
    let indent = prefix.len() + (rest.len() - marker.len());
    indent <= 3 && prefix.bytes().all(|b| b == b' ') && marker.starts_with('#')
}

/// Source lines outside fenced code blocks. Fence delimiter lines are
/// skipped too. Used for prose statistics, not for the outline.
pub fn lines_outside_fences(source: &str) -> impl Iterator<Item = &str> {
    let mut fence: Option<Fence> = None;
    source.lines().filter(move |line| {
        if let Some(open) = &fence {
            if open.is_closed_by(line) {
                fence = None;
            }
            return false;
        }
        if let Some(open) = Fence::open(line) {
            fence = Some(open);
            return false;
        }
        true
    })
}

/// Nest a flat heading list by the nearest-preceding-heading rule.
pub fn build_tree(flat: Vec<HeadingNode>) -> Vec<HeadingNode> {
    let mut roots: Vec<HeadingNode> = Vec::new();
    let mut stack: Vec<HeadingNode> = Vec::new();

    for mut heading in flat {
        heading.children.clear();
        while stack.last().is_some_and(|top| top.depth >= heading.depth) {
            close_top(&mut stack, &mut roots);
        }
        stack.push(heading);
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }

    roots
}

// Nodes stay on the stack until nothing more can attach to them, then move
// into their parent (or the root list). Owned values make this equivalent to
// attaching on push.
fn close_top(stack: &mut Vec<HeadingNode>, roots: &mut Vec<HeadingNode>) {
    let Some(node) = stack.pop() else {
        return;
    };
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

#[derive(Debug, Clone)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let trimmed = line.trim_start_matches(' ');
        if line.len() - trimmed.len() > 3 {
            return None;
        }
        let marker = trimmed.chars().next()?;
        if marker != '`' && marker != '~' {
            return None;
        }
        let len = trimmed.chars().take_while(|c| *c == marker).count();
        if len < 3 {
            return None;
        }
        // Backtick fences may not carry backticks in their info string.
        if marker == '`' && trimmed[len..].contains('`') {
            return None;
        }
        Some(Self { marker, len })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim_start_matches(' ');
        if line.len() - trimmed.len() > 3 {
            return false;
        }
        let len = trimmed.chars().take_while(|c| *c == self.marker).count();
        len >= self.len && trimmed[len..].trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(levels: &[(u8, &str)]) -> Vec<HeadingNode> {
        levels
            .iter()
            .map(|(depth, text)| HeadingNode::new(text.to_lowercase(), *depth, *text))
            .collect()
    }

    fn shape(nodes: &[HeadingNode]) -> String {
        nodes
            .iter()
            .map(|n| {
                if n.children.is_empty() {
                    n.text.clone()
                } else {
                    format!("{}[{}]", n.text, shape(&n.children))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn build_tree_nests_by_nearest_preceding_heading() {
        let tree = build_tree(flat(&[(2, "A"), (3, "B"), (3, "C"), (2, "D"), (4, "E")]));
        assert_eq!(shape(&tree), "A[B,C],D[E]");
        assert_eq!(tree[1].children[0].depth, 4);
    }

    #[test]
    fn build_tree_starts_new_root_for_shallower_heading() {
        let tree = build_tree(flat(&[(3, "A"), (2, "B"), (4, "C"), (3, "D"), (4, "E")]));
        assert_eq!(shape(&tree), "A,B[C,D[E]]");
    }

    #[test]
    fn build_tree_of_nothing_is_empty() {
        assert!(build_tree(Vec::new()).is_empty());
    }

    #[test]
    fn extract_skips_title_and_deep_headings() {
        let source = "# Title\n\n## Setup\n\n##### Too deep\n\n### Install the CLI ###\n#### Notes\n";
        let headings = extract_headings(source);
        let got: Vec<_> = headings
            .iter()
            .map(|h| (h.depth, h.id.as_str(), h.text.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (2, "setup", "Setup"),
                (3, "install-the-cli", "Install the CLI"),
                (4, "notes", "Notes"),
            ]
        );
    }

    #[test]
    fn extract_ignores_headings_inside_fences() {
        let source = "## Real\n\n```md\n## not a heading\n```\n\n~~~~\n### also not\n```\n~~~~\n\n## After\n";
        let ids: Vec<_> = extract_headings(source).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["real", "after"]);
    }

    #[test]
    fn extract_requires_space_after_hashes() {
        let source = "##NoSpace\n    ## indented code\n## Yes\n";
        let ids: Vec<_> = extract_headings(source).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["yes"]);
    }

    #[test]
    fn extract_suffixes_duplicate_ids() {
        let source = "## Overview\n### Overview\n## Overview\n";
        let ids: Vec<_> = extract_headings(source).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["overview", "overview-1", "overview-2"]);
    }

    #[test]
    fn extract_resolves_reference_links_and_skips_html_blocks() {
        let source = "## See [docs][ref]\n\n## Use [cargo]\n\n<div>\n## raw\n</div>\n\n## 1. Intro `code`\n\n[ref]: https://x.test\n[cargo]: https://doc.rust-lang.org/cargo/\n";
        let got: Vec<_> = extract_headings(source)
            .into_iter()
            .map(|h| (h.id, h.text))
            .collect();
        assert_eq!(
            got,
            vec![
                ("see-docs".to_owned(), "See docs".to_owned()),
                ("use-cargo".to_owned(), "Use cargo".to_owned()),
                ("1-intro-code".to_owned(), "1. Intro code".to_owned()),
            ]
        );
    }

    #[test]
    fn extract_skips_quoted_and_setext_headings() {
        let source = "> ## quoted\n\nSetext\n------\n\n## Kept **bold**\n";
        let ids: Vec<_> = extract_headings(source).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["kept-bold"]);
    }

    #[test]
    fn atx_line_detection() {
        let source = "## a\n   ## b\n> ## c\nx\n=\n";
        assert!(is_atx_line(source, 0));
        assert!(is_atx_line(source, 8));
        assert!(!is_atx_line(source, 15));
        assert!(!is_atx_line(source, 18));
        assert!(is_atx_line(source, 5));
    }

    #[test]
    fn unclosed_fence_swallows_rest_of_document() {
        let source = "## Before\n```\n## inside\n";
        let ids: Vec<_> = extract_headings(source).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["before"]);
    }
}
