use serde::{Deserialize, Serialize};

use crate::render::RenderedDocument;
use crate::toc::HeadingNode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub title: String,
    pub tagline: String,
    pub description: String,
    pub cover_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDescriptor {
    pub order: u32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub og_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The validated course index. Lessons are sorted by `order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub course: CourseInfo,
    pub lessons: Vec<LessonDescriptor>,
}

impl ManifestRecord {
    pub fn lesson(&self, slug: &str) -> Option<&LessonDescriptor> {
        self.lessons.iter().find(|lesson| lesson.slug == slug)
    }

    /// Previous and next lessons in navigation order.
    pub fn neighbors(
        &self,
        slug: &str,
    ) -> (Option<&LessonDescriptor>, Option<&LessonDescriptor>) {
        let Some(idx) = self.lessons.iter().position(|lesson| lesson.slug == slug) else {
            return (None, None);
        };
        let prev = idx.checked_sub(1).and_then(|i| self.lessons.get(i));
        (prev, self.lessons.get(idx + 1))
    }
}

/// Everything derived from one lesson fetch, cached as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContent {
    pub source_text: String,
    pub headings: Vec<HeadingNode>,
    pub document: RenderedDocument,
    pub word_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(order: u32, slug: &str) -> LessonDescriptor {
        LessonDescriptor {
            order,
            slug: slug.to_owned(),
            title: slug.to_uppercase(),
            description: String::new(),
            source_path: format!("/content/{slug}.md"),
            og_image: None,
            estimated_minutes: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn neighbors_follow_lesson_order() {
        let manifest = ManifestRecord {
            course: CourseInfo {
                title: "SQL".to_owned(),
                tagline: "t".to_owned(),
                description: "d".to_owned(),
                cover_image: "/cover.png".to_owned(),
            },
            lessons: vec![lesson(1, "select"), lesson(2, "joins"), lesson(3, "indexes")],
        };

        let (prev, next) = manifest.neighbors("joins");
        assert_eq!(prev.map(|l| l.slug.as_str()), Some("select"));
        assert_eq!(next.map(|l| l.slug.as_str()), Some("indexes"));

        let (prev, next) = manifest.neighbors("select");
        assert!(prev.is_none());
        assert_eq!(next.map(|l| l.order), Some(2));

        assert_eq!(manifest.neighbors("missing"), (None, None));
        assert_eq!(manifest.lesson("indexes").map(|l| l.order), Some(3));
    }

    #[test]
    fn descriptor_uses_camel_case_fields() -> anyhow::Result<()> {
        let json = r#"{"order":1,"slug":"select","title":"Select","description":"d",
            "sourcePath":"/content/select.md","estimatedMinutes":12,"tags":["basics"]}"#;
        let lesson: LessonDescriptor = serde_json::from_str(json)?;
        assert_eq!(lesson.source_path, "/content/select.md");
        assert_eq!(lesson.estimated_minutes, Some(12));
        assert_eq!(lesson.og_image, None);
        assert_eq!(lesson.tags, vec!["basics".to_owned()]);
        Ok(())
    }
}
