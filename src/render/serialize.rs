use pulldown_cmark::{CowStr, Event, Tag, TagEnd};
use url::Url;

use crate::render::Node;

const BLOCKED_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:"];

/// Serialize nodes to HTML. Raw HTML from the source becomes literal text;
/// only [`Node::Markup`] is written verbatim.
pub(crate) fn to_html(nodes: Vec<Node<'_>>) -> String {
    let events = nodes.into_iter().map(|node| match node {
        Node::Markup(markup) => Event::Html(CowStr::from(markup)),
        Node::Source { event, .. } => neutralize(event),
    });

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, events);
    html
}

fn neutralize(event: Event<'_>) -> Event<'_> {
    match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::HtmlBlock) => Event::Start(Tag::Paragraph),
        Event::End(TagEnd::HtmlBlock) => Event::End(TagEnd::Paragraph),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_destination(dest_url, false),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_destination(dest_url, true),
            title,
            id,
        }),
        other => other,
    }
}

fn safe_destination(dest: CowStr<'_>, is_image: bool) -> CowStr<'_> {
    let normalized: String = dest
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .collect::<String>()
        .to_ascii_lowercase();

    if is_image && normalized.starts_with("data:image/") {
        return dest;
    }
    if BLOCKED_SCHEMES.iter().any(|s| normalized.starts_with(s)) {
        tracing::debug!(destination = %dest, "neutralized unsafe link destination");
        return CowStr::Borrowed("#");
    }
    dest
}

/// A context-free rewrite of serialized HTML.
pub trait Rewrite: Send + Sync {
    fn name(&self) -> &'static str;
    fn rewrite(&self, html: String) -> String;
}

/// Adds `loading="lazy"` to every image.
#[derive(Debug, Clone, Copy, Default)]
pub struct LazyImages;

impl Rewrite for LazyImages {
    fn name(&self) -> &'static str {
        "lazy-images"
    }

    fn rewrite(&self, html: String) -> String {
        let mut out = String::with_capacity(html.len() + 64);
        let mut rest = html.as_str();

        while let Some(pos) = rest.find("<img ") {
            let (before, tag_and_after) = rest.split_at(pos);
            out.push_str(before);

            let tag_end = tag_and_after.find('>').unwrap_or(tag_and_after.len());
            let tag = &tag_and_after[..tag_end];
            if has_attribute(tag, "loading") {
                out.push_str(tag);
            } else {
                out.push_str("<img loading=\"lazy\" ");
                out.push_str(&tag["<img ".len()..]);
            }
            rest = &tag_and_after[tag_end..];
        }

        out.push_str(rest);
        out
    }
}

/// Opens off-site links in a new context without a back-reference.
#[derive(Debug, Clone, Default)]
pub struct ExternalLinks {
    site_origin: Option<Url>,
}

impl ExternalLinks {
    pub fn new(site_origin: Option<Url>) -> Self {
        Self { site_origin }
    }

    fn is_external(&self, href: &str) -> bool {
        if href.starts_with("//") {
            return true;
        }
        let Ok(url) = Url::parse(href) else {
            return false;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        match &self.site_origin {
            Some(site) => url.origin() != site.origin(),
            None => true,
        }
    }
}

impl Rewrite for ExternalLinks {
    fn name(&self) -> &'static str {
        "external-links"
    }

    fn rewrite(&self, html: String) -> String {
        const OPEN: &str = "<a href=\"";

        let mut out = String::with_capacity(html.len() + 64);
        let mut rest = html.as_str();

        while let Some(pos) = rest.find(OPEN) {
            let href_start = pos + OPEN.len();
            let Some(href_len) = rest[href_start..].find('"') else {
                break;
            };
            let href_end = href_start + href_len;
            let href = &rest[href_start..href_end];

            out.push_str(&rest[..=href_end]);
            if self.is_external(&unescape_attr(href)) {
                out.push_str(" target=\"_blank\" rel=\"noopener noreferrer\"");
            }
            rest = &rest[href_end + 1..];
        }

        out.push_str(rest);
        out
    }
}

/// Whether `tag` carries attribute `name`. Quoted values are skipped, so alt
/// or title text never counts.
fn has_attribute(tag: &str, name: &str) -> bool {
    let mut in_quotes = false;
    let mut unquoted = String::with_capacity(tag.len());
    for ch in tag.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            unquoted.push(ch);
        }
    }
    unquoted.contains(&format!(" {name}="))
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
