//! Knowledge context assembly from the learner's current selection.

use crate::Difficulty;
use crate::catalog::Catalog;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hard cap on the concept body excerpt carried in a context snapshot,
/// in characters. Keeps turn snapshots and prompts bounded.
pub const EXCERPT_CAP: usize = 500;

/// Snapshot of the selected concept at assembly time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptSnapshot {
    pub title: String,
    pub difficulty: Difficulty,
    pub body_excerpt: String,
}

/// Opaque learner progress aggregate, supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LearnerProgress {
    pub completed: u32,
    pub total: u32,
}

/// Derived snapshot of the learner's current subject/concept/difficulty.
///
/// Always a value object: rebuilt whenever the selection changes, never
/// edited in place. Absent fields default to empty rather than erroring —
/// callers must tolerate partial context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KnowledgeContext {
    pub subject: Option<String>,
    pub chapter: Option<String>,
    pub concept: Option<ConceptSnapshot>,
    #[serde(default)]
    pub related_concepts: Vec<String>,
    pub progress: Option<LearnerProgress>,
    pub difficulty: Option<Difficulty>,
}

impl KnowledgeContext {
    /// The concept title, or empty string when no concept is selected.
    pub fn concept_title(&self) -> &str {
        self.concept.as_ref().map(|c| c.title.as_str()).unwrap_or("")
    }
}

/// Truncate to at most `cap` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Builds [`KnowledgeContext`] values from a concept selection and the
/// read-only catalog. Same selection + same catalog ⇒ same context.
#[derive(Clone)]
pub struct ContextAssembler {
    catalog: Arc<Catalog>,
}

impl ContextAssembler {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Assemble a context for the given concept selection.
    ///
    /// An unknown or absent concept id yields a context with empty
    /// concept fields rather than failing.
    pub fn assemble(
        &self,
        concept_id: Option<&str>,
        progress: Option<LearnerProgress>,
    ) -> KnowledgeContext {
        let Some(location) = concept_id.and_then(|id| self.catalog.locate(id)) else {
            if let Some(id) = concept_id {
                tracing::debug!(concept_id = %id, "concept not in catalog, assembling partial context");
            }
            return KnowledgeContext {
                progress,
                ..KnowledgeContext::default()
            };
        };

        let related_concepts = location
            .chapter
            .concepts
            .iter()
            .filter(|c| c.id != location.concept.id)
            .map(|c| c.title.clone())
            .collect();

        KnowledgeContext {
            subject: Some(location.subject.name.clone()),
            chapter: Some(location.chapter.name.clone()),
            concept: Some(ConceptSnapshot {
                title: location.concept.title.clone(),
                difficulty: location.concept.difficulty,
                body_excerpt: truncate_chars(&location.concept.content, EXCERPT_CAP).to_string(),
            }),
            related_concepts,
            progress,
            difficulty: Some(location.concept.difficulty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(Arc::new(sample_catalog()))
    }

    #[test]
    fn test_assemble_full_context() {
        let context = assembler().assemble(Some("set-basics"), None);
        assert_eq!(context.subject.as_deref(), Some("数学"));
        assert_eq!(context.chapter.as_deref(), Some("集合"));
        let concept = context.concept.expect("concept populated");
        assert_eq!(concept.title, "集合的基本概念");
        assert_eq!(concept.difficulty, Difficulty::Basic);
        assert!(!concept.body_excerpt.is_empty());
        assert_eq!(context.difficulty, Some(Difficulty::Basic));
    }

    #[test]
    fn test_related_concepts_exclude_self() {
        let context = assembler().assemble(Some("set-basics"), None);
        assert_eq!(
            context.related_concepts,
            vec!["集合的表示方法", "集合间的关系"]
        );
    }

    #[test]
    fn test_unknown_id_yields_partial_context() {
        let progress = LearnerProgress {
            completed: 3,
            total: 10,
        };
        let context = assembler().assemble(Some("missing"), Some(progress));
        assert!(context.subject.is_none());
        assert!(context.concept.is_none());
        assert!(context.related_concepts.is_empty());
        assert_eq!(context.concept_title(), "");
        // Progress survives even when the selection doesn't resolve.
        assert_eq!(context.progress, Some(progress));
    }

    #[test]
    fn test_no_selection_yields_empty_context() {
        let context = assembler().assemble(None, None);
        assert_eq!(context, KnowledgeContext::default());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let assembler = assembler();
        let first = assembler.assemble(Some("set-relations"), None);
        let second = assembler.assemble(Some("set-relations"), None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        // Multibyte text must never be cut mid-character.
        let text = "集合是数学中最基本的概念";
        assert_eq!(truncate_chars(text, 4), "集合是数");
        assert_eq!(truncate_chars(text, 100), text);
        assert_eq!(truncate_chars("", 10), "");
    }
}
