//! Read-only content catalog: subjects, chapters, concepts.
//!
//! The catalog is an external data source as far as the orchestration
//! layer is concerned. It is loaded once (from JSON) and never mutated;
//! lookups are index-backed and deterministic.

use crate::Difficulty;
use crate::error::CatalogError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A teachable concept (knowledge point) within a chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub title: String,
    /// Explanatory body text. May be long; prompt builders excerpt it.
    pub content: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A chapter grouping concepts within a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub name: String,
    pub concepts: Vec<Concept>,
}

/// A top-level subject (e.g. mathematics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub chapters: Vec<Chapter>,
}

/// Location of a concept within the catalog tree.
#[derive(Debug, Clone, Copy)]
pub struct ConceptLocation<'a> {
    pub subject: &'a Subject,
    pub chapter: &'a Chapter,
    pub concept: &'a Concept,
}

/// The read-only catalog with an id index over all concepts.
#[derive(Debug)]
pub struct Catalog {
    subjects: Vec<Subject>,
    /// concept id → (subject index, chapter index, concept index)
    index: HashMap<String, (usize, usize, usize)>,
}

impl Catalog {
    pub fn new(subjects: Vec<Subject>) -> Result<Self, CatalogError> {
        if subjects.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::new();
        for (si, subject) in subjects.iter().enumerate() {
            for (ci, chapter) in subject.chapters.iter().enumerate() {
                for (ki, concept) in chapter.concepts.iter().enumerate() {
                    index.insert(concept.id.clone(), (si, ci, ki));
                }
            }
        }

        Ok(Self { subjects, index })
    }

    /// Load a catalog from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let subjects: Vec<Subject> = serde_json::from_str(json)?;
        Self::new(subjects)
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    /// Look up a concept by id. Unknown ids resolve to `None`, never an error.
    pub fn concept(&self, id: &str) -> Option<&Concept> {
        self.locate(id).map(|l| l.concept)
    }

    /// Look up a concept together with its chapter and subject.
    pub fn locate(&self, concept_id: &str) -> Option<ConceptLocation<'_>> {
        let &(si, ci, ki) = self.index.get(concept_id)?;
        let subject = &self.subjects[si];
        let chapter = &subject.chapters[ci];
        Some(ConceptLocation {
            subject,
            chapter,
            concept: &chapter.concepts[ki],
        })
    }

    /// All concepts under a subject, in chapter order.
    pub fn concepts_by_subject(&self, subject_id: &str) -> Vec<&Concept> {
        self.subjects
            .iter()
            .filter(|s| s.id == subject_id)
            .flat_map(|s| s.chapters.iter())
            .flat_map(|c| c.concepts.iter())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use indoc::indoc;

    pub(crate) const SAMPLE_CATALOG: &str = indoc! {r#"
        [
          {
            "id": "math",
            "name": "数学",
            "chapters": [
              {
                "id": "math-sets",
                "name": "集合",
                "concepts": [
                  {
                    "id": "set-basics",
                    "title": "集合的基本概念",
                    "content": "集合是数学中最基本的概念之一。把一些确定的、不同的对象放在一起形成的整体就是集合。集合有确定性、互异性、无序性三个特性。",
                    "difficulty": "basic",
                    "tags": ["集合"]
                  },
                  {
                    "id": "set-notation",
                    "title": "集合的表示方法",
                    "content": "集合主要有列举法和描述法两种表示方法。列举法把元素一一列举在大括号内，描述法用元素的共同特征来表示集合。",
                    "difficulty": "basic",
                    "tags": ["集合"]
                  },
                  {
                    "id": "set-relations",
                    "title": "集合间的关系",
                    "content": "集合之间主要有子集、真子集和相等三种关系。若A的每一个元素都属于B，则A是B的子集，记作A⊆B。",
                    "difficulty": "intermediate",
                    "tags": ["集合"]
                  }
                ]
              },
              {
                "id": "math-functions",
                "name": "函数",
                "concepts": [
                  {
                    "id": "fn-concept",
                    "title": "函数的概念",
                    "content": "函数描述两个数集之间的一种对应关系：对于数集A中的每一个元素，数集B中都有唯一确定的元素与之对应。",
                    "difficulty": "intermediate",
                    "tags": ["函数"]
                  }
                ]
              }
            ]
          }
        ]
    "#};

    pub(crate) fn sample_catalog() -> Catalog {
        Catalog::from_json(SAMPLE_CATALOG).expect("sample catalog parses")
    }

    #[test]
    fn test_from_json_and_lookup() {
        let catalog = sample_catalog();
        let concept = catalog.concept("set-basics").expect("known id resolves");
        assert_eq!(concept.title, "集合的基本概念");
        assert_eq!(concept.difficulty, Difficulty::Basic);
    }

    #[test]
    fn test_unknown_id_is_none() {
        let catalog = sample_catalog();
        assert!(catalog.concept("no-such-concept").is_none());
        assert!(catalog.locate("no-such-concept").is_none());
    }

    #[test]
    fn test_locate_carries_chapter_and_subject() {
        let catalog = sample_catalog();
        let location = catalog.locate("set-relations").unwrap();
        assert_eq!(location.subject.name, "数学");
        assert_eq!(location.chapter.name, "集合");
    }

    #[test]
    fn test_concepts_by_subject_spans_chapters() {
        let catalog = sample_catalog();
        let concepts = catalog.concepts_by_subject("math");
        assert_eq!(concepts.len(), 4);
        assert!(catalog.concepts_by_subject("physics").is_empty());
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(matches!(Catalog::new(vec![]), Err(CatalogError::Empty)));
    }
}
