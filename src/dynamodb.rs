//! Amazon DynamoDB record store.
//!
//! Implements [`RecordStore`] over the DynamoDB JSON protocol (`Query`,
//! `PutItem`, conditional `PutItem`, `DeleteItem`). Items cross the
//! boundary as plain JSON maps and are converted to and from attribute
//! values here:
//!
//! | JSON | DynamoDB |
//! |------|----------|
//! | string | `S` |
//! | number | `N` |
//! | bool | `BOOL` |
//! | null | `NULL` |
//! | array | `L` |
//! | object | `M` |

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Number, Value};

use phi_sync_core::models::Item;
use phi_sync_core::store::{ExpiredBefore, RecordStore};

use crate::aws::{AwsClient, AwsRequest, AwsResponse};

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// DynamoDB-backed [`RecordStore`].
pub struct DynamoRecordStore {
    client: Arc<AwsClient>,
}

impl DynamoRecordStore {
    pub fn new(client: Arc<AwsClient>) -> Self {
        Self { client }
    }

    async fn call(&self, operation: &str, body: Value) -> Result<AwsResponse> {
        let target = format!("DynamoDB_20120810.{}", operation);
        let req = AwsRequest::json_rpc("dynamodb", CONTENT_TYPE, &target, &body)?;
        self.client.send(&req).await
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn query_partition(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Item>> {
        if key_value.is_empty() {
            bail!("DynamoDB Query on {}: {} must not be empty", table, key_name);
        }
        if limit == Some(0) {
            bail!("DynamoDB Query on {}: limit must be at least 1", table);
        }

        let mut items = Vec::new();
        let mut start_key: Option<Value> = None;

        loop {
            let mut body = json!({
                "TableName": table,
                "KeyConditionExpression": "#pk = :pk",
                "ExpressionAttributeNames": { "#pk": key_name },
                "ExpressionAttributeValues": { ":pk": { "S": key_value } },
            });
            if let Some(n) = limit {
                body["Limit"] = json!(n.saturating_sub(items.len()));
            }
            if let Some(key) = start_key.take() {
                body["ExclusiveStartKey"] = key;
            }

            let resp = self.call("Query", body).await?;
            if !resp.is_success() {
                bail!("DynamoDB Query on {} failed: {}", table, resp.describe());
            }
            let page: Value = serde_json::from_slice(&resp.body)
                .with_context(|| format!("Invalid Query response from {}", table))?;

            if let Some(raw) = page.get("Items").and_then(Value::as_array) {
                for item in raw {
                    items.push(decode_item(item)?);
                }
            }

            let done = limit.is_some_and(|n| items.len() >= n);
            match page.get("LastEvaluatedKey") {
                Some(key) if !done && !key.is_null() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn put(&self, table: &str, item: Item) -> Result<()> {
        let body = json!({ "TableName": table, "Item": encode_item(&item) });
        let resp = self.call("PutItem", body).await?;
        if !resp.is_success() {
            bail!("DynamoDB PutItem on {} failed: {}", table, resp.describe());
        }
        Ok(())
    }

    async fn put_if_absent(
        &self,
        table: &str,
        item: Item,
        key_name: &str,
        expired: Option<ExpiredBefore>,
    ) -> Result<bool> {
        let body = conditional_put_body(table, &item, key_name, expired.as_ref());
        let resp = self.call("PutItem", body).await?;
        if resp.is_success() {
            return Ok(true);
        }
        if resp.error_code().as_deref() == Some("ConditionalCheckFailedException") {
            return Ok(false);
        }
        bail!("DynamoDB conditional PutItem on {} failed: {}", table, resp.describe())
    }

    async fn delete(&self, table: &str, key: Item) -> Result<()> {
        let body = json!({ "TableName": table, "Key": encode_item(&key) });
        let resp = self.call("DeleteItem", body).await?;
        if !resp.is_success() {
            bail!("DynamoDB DeleteItem on {} failed: {}", table, resp.describe());
        }
        Ok(())
    }
}

/// `PutItem` request that succeeds only when `key_name` is free, or held
/// by an item whose `expired.attribute` is below `expired.cutoff`.
fn conditional_put_body(
    table: &str,
    item: &Item,
    key_name: &str,
    expired: Option<&ExpiredBefore>,
) -> Value {
    let mut body = json!({
        "TableName": table,
        "Item": encode_item(item),
        "ConditionExpression": "attribute_not_exists(#pk)",
        "ExpressionAttributeNames": { "#pk": key_name },
    });
    if let Some(expired) = expired {
        body["ConditionExpression"] = json!("attribute_not_exists(#pk) OR #ts < :cutoff");
        body["ExpressionAttributeNames"]["#ts"] = json!(expired.attribute);
        body["ExpressionAttributeValues"] =
            json!({ ":cutoff": { "N": expired.cutoff.to_string() } });
    }
    body
}

/// Encode a JSON map as a DynamoDB attribute map.
pub fn encode_item(item: &Item) -> Value {
    Value::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::String(s) => json!({ "S": s }),
        Value::Number(n) => json!({ "N": n.to_string() }),
        Value::Bool(b) => json!({ "BOOL": b }),
        Value::Null => json!({ "NULL": true }),
        Value::Array(values) => json!({ "L": values.iter().map(encode_value).collect::<Vec<_>>() }),
        Value::Object(map) => json!({ "M": encode_item(map) }),
    }
}

/// Decode a DynamoDB attribute map into a JSON map.
pub fn decode_item(raw: &Value) -> Result<Item> {
    let map = raw
        .as_object()
        .ok_or_else(|| anyhow!("DynamoDB item is not an object"))?;
    map.iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v).with_context(|| format!("attribute {}", k))?)))
        .collect()
}

fn decode_value(attr: &Value) -> Result<Value> {
    let map = attr
        .as_object()
        .ok_or_else(|| anyhow!("attribute value is not an object"))?;
    let (tag, inner) = map
        .iter()
        .next()
        .ok_or_else(|| anyhow!("empty attribute value"))?;

    Ok(match tag.as_str() {
        "S" => inner.clone(),
        "N" => {
            let text = inner.as_str().ok_or_else(|| anyhow!("N value is not a string"))?;
            Value::Number(parse_number(text)?)
        }
        "BOOL" => inner.clone(),
        "NULL" => Value::Null,
        "L" => Value::Array(
            inner
                .as_array()
                .ok_or_else(|| anyhow!("L value is not an array"))?
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        "M" => Value::Object(decode_item(inner)?),
        "SS" | "NS" | "BS" | "B" => inner.clone(),
        other => bail!("unsupported attribute type {}", other),
    })
}

fn parse_number(text: &str) -> Result<Number> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Number::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| anyhow!("invalid number {:?}", text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AwsConfig, RetryConfig};
    use crate::sigv4::AwsCredentials;
    use std::time::Duration;

    #[test]
    fn encodes_document_record() {
        let item: Item = json!({ "fileName": "patient123", "insertionTime": 1700000000000i64, "text": "a b" })
            .as_object()
            .unwrap()
            .clone();
        assert_eq!(
            encode_item(&item),
            json!({
                "fileName": { "S": "patient123" },
                "insertionTime": { "N": "1700000000000" },
                "text": { "S": "a b" }
            })
        );
    }

    #[test]
    fn decodes_nested_values() {
        let raw = json!({
            "fileName": { "S": "p1" },
            "insertionTime": { "N": "42" },
            "ratio": { "N": "0.5" },
            "flag": { "BOOL": true },
            "gone": { "NULL": true },
            "tags": { "L": [{ "S": "x" }] },
            "meta": { "M": { "k": { "S": "v" } } }
        });
        let item = decode_item(&raw).unwrap();
        assert_eq!(item["fileName"], json!("p1"));
        assert_eq!(item["insertionTime"], json!(42));
        assert_eq!(item["ratio"], json!(0.5));
        assert_eq!(item["flag"], json!(true));
        assert_eq!(item["gone"], Value::Null);
        assert_eq!(item["tags"], json!(["x"]));
        assert_eq!(item["meta"], json!({ "k": "v" }));
    }

    fn store() -> DynamoRecordStore {
        let client = AwsClient::new(
            &AwsConfig::default(),
            &RetryConfig::default(),
            Duration::from_secs(1),
            AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
        )
        .unwrap();
        DynamoRecordStore::new(Arc::new(client))
    }

    #[test]
    fn lease_condition_allows_expired_claims() {
        let item: Item = json!({ "fileName": "p1", "claimedAt": 5000 })
            .as_object()
            .unwrap()
            .clone();
        let expired = ExpiredBefore {
            attribute: "claimedAt".into(),
            cutoff: 4000,
        };
        let body = conditional_put_body("Claims", &item, "fileName", Some(&expired));
        assert_eq!(
            body["ConditionExpression"],
            "attribute_not_exists(#pk) OR #ts < :cutoff"
        );
        assert_eq!(
            body["ExpressionAttributeNames"],
            json!({ "#pk": "fileName", "#ts": "claimedAt" })
        );
        assert_eq!(body["ExpressionAttributeValues"], json!({ ":cutoff": { "N": "4000" } }));

        let plain = conditional_put_body("Claims", &item, "fileName", None);
        assert_eq!(plain["ConditionExpression"], "attribute_not_exists(#pk)");
        assert!(plain.get("ExpressionAttributeValues").is_none());
    }

    #[tokio::test]
    async fn zero_limit_rejected_before_sending() {
        let err = store()
            .query_partition("EhrTable", "fileName", "p1", Some(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("limit must be at least 1"), "{}", err);
    }

    #[tokio::test]
    async fn empty_partition_key_rejected_before_sending() {
        let err = store()
            .query_partition("EhrTable", "fileName", "", Some(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fileName must not be empty"), "{}", err);
    }

    #[test]
    fn bad_number_rejected() {
        assert!(decode_item(&json!({ "n": { "N": "abc" } })).is_err());
    }
}
