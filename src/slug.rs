use std::collections::HashSet;

use pulldown_cmark::Event;

const EMPTY_SLUG: &str = "section";

/// Canonical anchor slug for a heading's plain text.
///
/// Lowercases, drops everything outside `[a-z0-9\s-]`, collapses whitespace
/// runs into a single hyphen and trims hyphens from both ends.
#[must_use]
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-') {
            continue;
        }
        if pending_space {
            out.push('-');
            pending_space = false;
        }
        out.push(ch);
    }

    out.trim_matches('-').to_owned()
}

/// Appends the plain-text part of an inline event (text and code spans).
pub(crate) fn push_plain_text(out: &mut String, event: &Event<'_>) {
    match event {
        Event::Text(t) | Event::Code(t) => out.push_str(t),
        Event::SoftBreak | Event::HardBreak => out.push(' '),
        _ => {}
    }
}

/// Hands out document-unique heading ids.
///
/// The first heading with a given slug keeps it; later duplicates get `-1`,
/// `-2`, ... (skipping suffixes already in use).
#[derive(Debug, Default)]
pub struct SlugRegistry {
    taken: HashSet<String>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, text: &str) -> String {
        let mut base = slugify(text);
        if base.is_empty() {
            base = EMPTY_SLUG.to_owned();
        }

        if self.taken.insert(base.clone()) {
            return base;
        }

        let mut n = 1usize;
        loop {
            let candidate = format!("{base}-{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
