//! Markdown assembly: one document per page, one merged document per folder.

use std::collections::HashSet;

use super::manifest::LayoutManifest;
use super::region::RegionKind;
use super::PipelineError;

/// File name of the folder-level merge.
pub const MERGED_FILE: &str = "merged_all.md";

/// Minimum whitespace-free length for duplicate suppression.
const DEDUP_MIN_CHARS: usize = 30;

/// One region's contribution to a page document.
pub struct MergeItem<'a> {
    pub id: &'a str,
    pub kind: RegionKind,
    pub text: &'a str,
}

fn format_block(kind: RegionKind, text: &str) -> String {
    match kind {
        RegionKind::Title => format!("## {text}"),
        RegionKind::Table => format!("```\n{text}\n```"),
        RegionKind::Text => text.to_string(),
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect()
}

/// Build a page document from items already in reading order.
///
/// Empty texts are skipped. A long text already emitted on this page is
/// not emitted again.
pub fn build_document<'a>(
    image_name: &str,
    items: impl IntoIterator<Item = MergeItem<'a>>,
) -> Result<String, PipelineError> {
    let mut doc = format!("# {image_name}\n\n");
    let mut seen: HashSet<String> = HashSet::new();
    let mut emitted = 0usize;

    for item in items {
        if item.text.trim().is_empty() {
            continue;
        }
        let normalized = normalize(item.text);
        if normalized.chars().count() >= DEDUP_MIN_CHARS && !seen.insert(normalized) {
            tracing::debug!(region_id = item.id, "Dropping duplicate region text");
            continue;
        }
        if !item.id.is_empty() {
            doc.push_str(&format!("<!-- region_id: {} -->\n", item.id));
        }
        doc.push_str(&format_block(item.kind, item.text));
        doc.push_str("\n\n");
        emitted += 1;
    }

    if emitted == 0 {
        return Err(PipelineError::EmptyResult(image_name.to_string()));
    }
    Ok(doc)
}

/// Page document from a manifest whose regions carry recognized text.
pub fn document_from_manifest(manifest: &LayoutManifest) -> Result<String, PipelineError> {
    let items = manifest.reading_order().into_iter().map(|i| {
        let region = &manifest.regions[i];
        MergeItem {
            id: &region.id,
            kind: region.kind(),
            text: region.text.as_deref().unwrap_or(""),
        }
    });
    build_document(&manifest.image_name, items)
}

/// Concatenate page documents under one heading, separated by rules.
pub fn merge_documents(documents: &[String]) -> String {
    let mut merged = format!("# Merged document ({} pages)\n\n", documents.len());
    merged.push_str(&documents.join("---\n\n"));
    merged
}
