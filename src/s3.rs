//! Amazon S3 object store.
//!
//! Implements [`ObjectStore`] over the S3 REST API: `ListObjectsV2` with
//! `delimiter=/` for top-level prefixes, without a delimiter for group
//! members, and `GetObject` for CSV bodies. Large listings are followed
//! through continuation tokens.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Method;

use phi_sync_core::store::ObjectStore;

use crate::aws::{AwsClient, AwsRequest};
use crate::sigv4::encode_key_path;

/// S3-backed [`ObjectStore`].
pub struct S3ObjectStore {
    client: Arc<AwsClient>,
}

impl S3ObjectStore {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    /// Follow `ListObjectsV2` pages until the listing is complete.
    async fn list_all(&self, bucket: &str, prefix: &str, delimiter: Option<&str>) -> Result<ListPage> {
        let mut all = ListPage::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = AwsRequest::new(Method::GET, "s3");
            req.bucket = Some(bucket.to_string());
            req.query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                req.query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(d) = delimiter {
                req.query.push(("delimiter".to_string(), d.to_string()));
            }
            if let Some(ref token) = continuation_token {
                req.query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.client.send(&req).await?;
            if !resp.is_success() {
                bail!("S3 ListObjectsV2 on {} failed: {}", bucket, resp.describe());
            }

            let page = parse_list_objects_response(&resp.text())?;
            all.keys.extend(page.keys);
            all.common_prefixes.extend(page.common_prefixes);

            match page.next_token {
                Some(token) if page.is_truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(all)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_top_level_prefixes(&self, bucket: &str) -> Result<Vec<String>> {
        Ok(self.list_all(bucket, "", Some("/")).await?.common_prefixes)
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self.list_all(bucket, prefix, None).await?.keys)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let mut req = AwsRequest::new(Method::GET, "s3");
        req.bucket = Some(bucket.to_string());
        req.path = format!("/{}", encode_key_path(key));

        let resp = self.client.send(&req).await?;
        if !resp.is_success() {
            bail!("S3 GetObject s3://{}/{} failed: {}", bucket, key, resp.describe());
        }
        Ok(resp.body)
    }
}

/// One parsed `ListObjectsV2` response.
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    keys: Vec<String>,
    common_prefixes: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML response. Folder placeholder keys (ending
/// in `/`) are dropped.
fn parse_list_objects_response(xml: &str) -> Result<ListPage> {
    let is_truncated = extract_xml_value(xml, "IsTruncated")?
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken")?;

    let mut keys = Vec::new();
    for block in xml_blocks(xml, "Contents") {
        if let Some(key) = extract_xml_value(block, "Key")? {
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }
    }

    let mut common_prefixes = Vec::new();
    for block in xml_blocks(xml, "CommonPrefixes") {
        if let Some(prefix) = extract_xml_value(block, "Prefix")? {
            common_prefixes.push(prefix);
        }
    }

    Ok(ListPage {
        keys,
        common_prefixes,
        is_truncated,
        next_token,
    })
}

/// Inner text of every `<tag>...</tag>` block, in document order.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        let block_start = start + open.len();
        match remaining[block_start..].find(&close) {
            Some(end) => {
                blocks.push(&remaining[block_start..block_start + end]);
                remaining = &remaining[block_start + end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Extract and unescape the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Result<Option<String>> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    if let Some(start) = xml.find(&open) {
        let value_start = start + open.len();
        if let Some(end) = xml[value_start..].find(&close) {
            let raw = &xml[value_start..value_start + end];
            let value = quick_xml::escape::unescape(raw)
                .map_err(|e| anyhow::anyhow!("invalid XML text in <{}>: {}", tag, e))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX_LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>ehr-uploads</Name>
  <Prefix></Prefix>
  <Delimiter>/</Delimiter>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>stray.png</Key><Size>3</Size></Contents>
  <CommonPrefixes><Prefix>patient123/</Prefix></CommonPrefixes>
  <CommonPrefixes><Prefix>patient&amp;co/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

    #[test]
    fn parses_common_prefixes_not_request_prefix() {
        let page = parse_list_objects_response(PREFIX_LISTING).unwrap();
        assert_eq!(page.common_prefixes, vec!["patient123/", "patient&co/"]);
        assert_eq!(page.keys, vec!["stray.png"]);
        assert!(!page.is_truncated);
    }

    #[test]
    fn parses_truncated_member_listing() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc==</NextContinuationToken>
  <Contents><Key>p1/</Key></Contents>
  <Contents><Key>p1/page1.png</Key></Contents>
  <Contents><Key>p1/HeartRate_CountPerMin.csv</Key></Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response(xml).unwrap();
        assert_eq!(page.keys, vec!["p1/page1.png", "p1/HeartRate_CountPerMin.csv"]);
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc=="));
    }

    #[test]
    fn empty_listing() {
        let page = parse_list_objects_response("<ListBucketResult></ListBucketResult>").unwrap();
        assert_eq!(page, ListPage::default());
    }

    #[test]
    fn extract_missing_tag() {
        assert_eq!(extract_xml_value("<a>1</a>", "b").unwrap(), None);
        assert_eq!(extract_xml_value("<a>1 &lt; 2</a>", "a").unwrap().as_deref(), Some("1 < 2"));
    }
}
