//! Amazon Textract document analyzer.
//!
//! Calls `AnalyzeDocument` synchronously on an S3 object and rebuilds
//! per-page text from the `LINE` blocks of the response, in reading
//! order. Lines of one page are joined with newlines; the core cleanup
//! step collapses them later.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use phi_sync_core::models::{AnalyzedDocument, FeatureType, PageText};
use phi_sync_core::store::DocumentAnalyzer;

use crate::aws::{AwsClient, AwsRequest};

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET: &str = "Textract.AnalyzeDocument";

/// Textract-backed [`DocumentAnalyzer`].
pub struct TextractAnalyzer {
    client: Arc<AwsClient>,
}

impl TextractAnalyzer {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentAnalyzer for TextractAnalyzer {
    async fn analyze(
        &self,
        bucket: &str,
        key: &str,
        features: &[FeatureType],
    ) -> Result<AnalyzedDocument> {
        let body = json!({
            "Document": { "S3Object": { "Bucket": bucket, "Name": key } },
            "FeatureTypes": features.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
        });
        let req = AwsRequest::json_rpc("textract", CONTENT_TYPE, TARGET, &body)?;

        let resp = self.client.send(&req).await?;
        if !resp.is_success() {
            bail!("Textract AnalyzeDocument on s3://{}/{} failed: {}", bucket, key, resp.describe());
        }

        let parsed: AnalyzeDocumentResponse = serde_json::from_slice(&resp.body)
            .with_context(|| format!("Invalid AnalyzeDocument response for {}", key))?;
        Ok(parsed.into_document())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AnalyzeDocumentResponse {
    #[serde(default)]
    document_metadata: Option<DocumentMetadata>,
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentMetadata {
    #[serde(default)]
    pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Block {
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    /// Absent on single-page documents.
    #[serde(default)]
    page: Option<u32>,
}

impl AnalyzeDocumentResponse {
    fn into_document(self) -> AnalyzedDocument {
        let mut pages: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for block in self.blocks {
            if block.block_type != "LINE" {
                continue;
            }
            if let Some(text) = block.text {
                pages.entry(block.page.unwrap_or(1)).or_default().push(text);
            }
        }

        let highest = pages.keys().next_back().copied().unwrap_or(0);
        let page_count = self
            .document_metadata
            .map(|m| m.pages)
            .unwrap_or(0)
            .max(highest);

        AnalyzedDocument {
            page_count,
            pages: pages
                .into_iter()
                .map(|(page, lines)| PageText {
                    page,
                    text: lines.join("\n"),
                })
                .collect(),
        }
    }
}
