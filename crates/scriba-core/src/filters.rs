//! Filter registry and name resolution.
//!
//! The engine exposes import (load) and export filters under canonical
//! identifiers, but users refer to them by short names or file suffixes.
//! The registry is queried from the live engine once at service startup
//! and resolves requested names case-insensitively.

use crate::engine::DocumentEngine;
use crate::error::{Result, ScribaError};
use serde::{Deserialize, Serialize};

/// Whether a filter loads documents or writes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterDirection {
    Import,
    Export,
}

impl std::fmt::Display for FilterDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterDirection::Import => write!(f, "import"),
            FilterDirection::Export => write!(f, "export"),
        }
    }
}

/// Document family a filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFamily {
    Text,
    Spreadsheet,
    Presentation,
    Drawing,
    Web,
}

/// One filter as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDescriptor {
    /// Canonical identifier, e.g. `writer_pdf_Export`.
    pub id: String,
    /// Human-readable name, e.g. `Writer PDF Export`.
    pub name: String,
    /// Short names and file suffixes this filter answers to.
    #[serde(default)]
    pub aliases: Vec<String>,
    pub family: DocumentFamily,
}

/// Filters known to the running engine, split by direction.
///
/// Populated once per engine lifetime; a restarted engine gets a fresh
/// registry.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    import: Vec<FilterDescriptor>,
    export: Vec<FilterDescriptor>,
}

impl FilterRegistry {
    pub fn new(import: Vec<FilterDescriptor>, export: Vec<FilterDescriptor>) -> Self {
        Self { import, export }
    }

    /// Query both filter directions from the engine.
    pub async fn from_engine(engine: &dyn DocumentEngine) -> Result<Self> {
        let import = engine.import_filters().await?;
        let export = engine.export_filters().await?;
        tracing::debug!(
            import = import.len(),
            export = export.len(),
            "Populated filter registry from engine"
        );
        Ok(Self::new(import, export))
    }

    fn filters(&self, direction: FilterDirection) -> &[FilterDescriptor] {
        match direction {
            FilterDirection::Import => &self.import,
            FilterDirection::Export => &self.export,
        }
    }

    /// Resolve a user-supplied name to a filter descriptor.
    ///
    /// Match order, all case-insensitive: canonical identifier, then
    /// alias, then the name with a leading dot stripped (so `.pdf` and
    /// `pdf` both hit a filter aliased to the suffix).
    ///
    /// Several filters can answer to the same alias (`writer_pdf_Export`
    /// and `calc_pdf_Export` both claim `pdf`); when the document family
    /// is known, the candidate matching it wins.
    pub fn resolve(
        &self,
        needle: &str,
        direction: FilterDirection,
        family: Option<DocumentFamily>,
    ) -> Result<&FilterDescriptor> {
        let filters = self.filters(direction);
        let lowered = needle.to_lowercase();

        // Canonical ids are unambiguous; family never overrides them
        if let Some(f) = filters.iter().find(|f| f.id.to_lowercase() == lowered) {
            return Ok(f);
        }

        let by_name = filters.iter().filter(|f| {
            f.name.to_lowercase() == lowered
                || f.aliases.iter().any(|a| a.to_lowercase() == lowered)
        });
        if let Some(f) = Self::prefer_family(by_name, family) {
            return Ok(f);
        }

        let suffix = lowered.trim_start_matches('.');
        let by_suffix = filters
            .iter()
            .filter(|f| f.aliases.iter().any(|a| a.to_lowercase() == suffix));
        if let Some(f) = Self::prefer_family(by_suffix, family) {
            return Ok(f);
        }

        Err(ScribaError::UnknownFilter {
            name: needle.to_string(),
            direction: direction.to_string(),
            known: self.known_ids_for(direction, family),
        })
    }

    fn prefer_family<'a>(
        candidates: impl Iterator<Item = &'a FilterDescriptor>,
        family: Option<DocumentFamily>,
    ) -> Option<&'a FilterDescriptor> {
        let mut first = None;
        for candidate in candidates {
            if Some(candidate.family) == family {
                return Some(candidate);
            }
            first.get_or_insert(candidate);
        }
        first
    }

    /// Canonical identifiers for a direction, alphabetically sorted.
    pub fn known_ids(&self, direction: FilterDirection) -> Vec<String> {
        self.known_ids_for(direction, None)
    }

    /// Like [`FilterRegistry::known_ids`], narrowed to one document family
    /// when it is known (and the narrowing leaves anything to suggest).
    pub fn known_ids_for(
        &self,
        direction: FilterDirection,
        family: Option<DocumentFamily>,
    ) -> Vec<String> {
        let filters = self.filters(direction);
        let mut ids: Vec<String> = filters
            .iter()
            .filter(|f| family.is_none() || Some(f.family) == family)
            .map(|f| f.id.clone())
            .collect();
        if ids.is_empty() {
            ids = filters.iter().map(|f| f.id.clone()).collect();
        }
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, name: &str, aliases: &[&str], family: DocumentFamily) -> FilterDescriptor {
        FilterDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            family,
        }
    }

    fn registry() -> FilterRegistry {
        FilterRegistry::new(
            vec![
                descriptor("writer8", "ODF Text Document", &["odt"], DocumentFamily::Text),
                descriptor("MS Word 2007 XML", "Word 2007-365", &["docx"], DocumentFamily::Text),
            ],
            vec![
                descriptor(
                    "writer_pdf_Export",
                    "Writer PDF Export",
                    &["pdf"],
                    DocumentFamily::Text,
                ),
                descriptor("writer8", "ODF Text Document", &["odt"], DocumentFamily::Text),
                descriptor(
                    "calc_pdf_Export",
                    "Calc PDF Export",
                    &["pdf"],
                    DocumentFamily::Spreadsheet,
                ),
            ],
        )
    }

    #[test]
    fn test_resolve_canonical_id() {
        let reg = registry();
        let f = reg
            .resolve("writer_pdf_Export", FilterDirection::Export, None)
            .unwrap();
        assert_eq!(f.id, "writer_pdf_Export");
    }

    #[test]
    fn test_alias_resolution_matches_canonical() {
        let reg = registry();
        let by_id = reg
            .resolve("writer_pdf_Export", FilterDirection::Export, None)
            .unwrap()
            .id
            .clone();
        let by_alias = reg
            .resolve("pdf", FilterDirection::Export, None)
            .unwrap()
            .id
            .clone();
        let by_suffix = reg
            .resolve(".pdf", FilterDirection::Export, None)
            .unwrap()
            .id
            .clone();

        assert_eq!(by_id, by_alias);
        assert_eq!(by_id, by_suffix);
    }

    #[test]
    fn test_resolution_is_case_insensitive() {
        let reg = registry();
        let f = reg
            .resolve("WRITER_PDF_EXPORT", FilterDirection::Export, None)
            .unwrap();
        assert_eq!(f.id, "writer_pdf_Export");

        let f = reg.resolve("PDF", FilterDirection::Export, None).unwrap();
        assert_eq!(f.id, "writer_pdf_Export");
    }

    #[test]
    fn test_resolve_by_human_name() {
        let reg = registry();
        let f = reg
            .resolve("Word 2007-365", FilterDirection::Import, None)
            .unwrap();
        assert_eq!(f.id, "MS Word 2007 XML");
    }

    #[test]
    fn test_directions_are_separate() {
        let reg = registry();
        // docx only exists on the import side
        assert!(reg.resolve("docx", FilterDirection::Import, None).is_ok());
        assert!(reg.resolve("docx", FilterDirection::Export, None).is_err());
    }

    #[test]
    fn test_family_disambiguates_shared_alias() {
        let reg = registry();

        // Both pdf exporters answer to the alias; the family decides
        let f = reg
            .resolve("pdf", FilterDirection::Export, Some(DocumentFamily::Spreadsheet))
            .unwrap();
        assert_eq!(f.id, "calc_pdf_Export");

        let f = reg
            .resolve(".pdf", FilterDirection::Export, Some(DocumentFamily::Text))
            .unwrap();
        assert_eq!(f.id, "writer_pdf_Export");
    }

    #[test]
    fn test_unmatched_family_falls_back_to_first_candidate() {
        let reg = registry();
        let f = reg
            .resolve("pdf", FilterDirection::Export, Some(DocumentFamily::Drawing))
            .unwrap();
        assert_eq!(f.id, "writer_pdf_Export");
    }

    #[test]
    fn test_canonical_id_ignores_family() {
        let reg = registry();
        let f = reg
            .resolve(
                "writer_pdf_Export",
                FilterDirection::Export,
                Some(DocumentFamily::Spreadsheet),
            )
            .unwrap();
        assert_eq!(f.id, "writer_pdf_Export");
    }

    #[test]
    fn test_unknown_filter_with_family_narrows_suggestions() {
        let reg = registry();
        let err = reg
            .resolve(
                "docx9000",
                FilterDirection::Export,
                Some(DocumentFamily::Spreadsheet),
            )
            .unwrap_err();

        match err {
            ScribaError::UnknownFilter { known, .. } => {
                assert_eq!(known, vec!["calc_pdf_Export".to_string()]);
            }
            other => panic!("Expected UnknownFilter, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_filter_lists_sorted_ids() {
        let reg = registry();
        let err = reg
            .resolve("docx9000", FilterDirection::Export, None)
            .unwrap_err();

        match err {
            ScribaError::UnknownFilter {
                name,
                direction,
                known,
            } => {
                assert_eq!(name, "docx9000");
                assert_eq!(direction, "export");
                assert_eq!(
                    known,
                    vec![
                        "calc_pdf_Export".to_string(),
                        "writer8".to_string(),
                        "writer_pdf_Export".to_string(),
                    ]
                );
            }
            other => panic!("Expected UnknownFilter, got: {:?}", other),
        }
    }
}
