//! Document text extraction.
//!
//! Wraps a [`DocumentAnalyzer`] and turns its structured response into the
//! cleaned, page-ordered text of one image object. Only image objects may be
//! passed in; routing is the caller's job.

use std::sync::Arc;

use tracing::debug;

use crate::clean::clean_page_text;
use crate::error::{SyncError, SyncResult};
use crate::models::{AnalyzedDocument, ObjectRef, DOCUMENT_FEATURES};
use crate::store::DocumentAnalyzer;

/// Extracts cleaned per-page text from image objects.
#[derive(Clone)]
pub struct DocumentTextExtractor {
    analyzer: Arc<dyn DocumentAnalyzer>,
}

impl DocumentTextExtractor {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Analyze `object` and return the cleaned text of pages `1..=N`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExtractionFailed`] when the service call fails.
    pub async fn extract(&self, object: &ObjectRef) -> SyncResult<Vec<String>> {
        let doc = self
            .analyzer
            .analyze(&object.bucket, &object.key, &DOCUMENT_FEATURES)
            .await
            .map_err(|source| SyncError::ExtractionFailed {
                key: object.key.clone(),
                source,
            })?;

        let pages = ordered_pages(doc);
        debug!(key = %object.key, pages = pages.len(), "extracted document");
        Ok(pages.iter().map(|raw| clean_page_text(raw)).collect())
    }
}

/// Raw text of pages `1..=N` in order, where `N` is the larger of the
/// reported page count and the highest page seen. Pages with no text come
/// back empty so numbering has no gaps.
fn ordered_pages(doc: AnalyzedDocument) -> Vec<String> {
    let highest = doc.pages.iter().map(|p| p.page).max().unwrap_or(0);
    let count = doc.page_count.max(highest) as usize;
    let mut pages = vec![String::new(); count];
    for page in doc.pages {
        if page.page == 0 {
            continue;
        }
        let slot = &mut pages[page.page as usize - 1];
        if !slot.is_empty() {
            slot.push(' ');
        }
        slot.push_str(&page.text);
    }
    pages
}
