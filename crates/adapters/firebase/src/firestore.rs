//! Cloud Firestore REST client (firestore.googleapis.com/v1).
//!
//! Typed field values, document create/patch/get/list, and a commit helper
//! for server-assigned timestamps. Live queries are the consumer's concern
//! (this client is polled).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

const DEFAULT_FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum FirestoreError {
    #[error("firestore request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("firestore api error: {0}")]
    Api(String),
}

/// One typed Firestore field value. Only the variants the chat schema uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_value: Option<FsMapValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsMapValue {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, FsValue>,
}

impl FsValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            boolean_value: Some(value),
            ..Default::default()
        }
    }

    pub fn timestamp(at: DateTime<Utc>) -> Self {
        Self {
            timestamp_value: Some(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ..Default::default()
        }
    }

    pub fn map(fields: HashMap<String, FsValue>) -> Self {
        Self {
            map_value: Some(FsMapValue { fields }),
            ..Default::default()
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.string_value.as_deref()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.boolean_value
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp_value.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn as_map(&self) -> Option<&HashMap<String, FsValue>> {
        self.map_value.as_ref().map(|m| &m.fields)
    }
}

/// One Firestore document: full resource name plus typed fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: HashMap<String, FsValue>,
}

impl FsDocument {
    /// Trailing path segment of the resource name — the document id.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub fn field(&self, key: &str) -> Option<&FsValue> {
        self.fields.get(key)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<FsDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Client for one project's default Firestore database.
#[derive(Clone)]
pub struct FirestoreClient {
    base_url: String,
    project_id: String,
    client: reqwest::Client,
}

impl FirestoreClient {
    pub fn new(project_id: impl Into<String>, emulator_host: Option<&str>) -> Self {
        let base_url = match emulator_host {
            Some(host) => format!("http://{}/v1", host),
            None => DEFAULT_FIRESTORE_BASE.to_string(),
        };
        Self {
            base_url,
            project_id: project_id.into(),
            client: reqwest::Client::new(),
        }
    }

    /// `projects/{p}/databases/(default)/documents`
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    fn document_url(&self, document_path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.documents_root(), document_path)
    }

    /// Full resource name for a document path, as used inside commit writes.
    pub fn document_name(&self, document_path: &str) -> String {
        format!("{}/{}", self.documents_root(), document_path)
    }

    /// POST a new document with a client-chosen id into `collection_path`,
    /// letting the server set `timestamp_field` via a REQUEST_TIME transform
    /// in the same atomic commit.
    pub async fn create_with_server_time(
        &self,
        collection_path: &str,
        document_id: &str,
        fields: HashMap<String, FsValue>,
        timestamp_field: &str,
    ) -> Result<(), FirestoreError> {
        let url = format!("{}/{}:commit", self.base_url, self.documents_root());
        let name = self.document_name(&format!("{}/{}", collection_path, document_id));
        let body = json!({
            "writes": [{
                "update": { "name": name, "fields": fields },
                "updateTransforms": [{
                    "fieldPath": timestamp_field,
                    "setToServerValue": "REQUEST_TIME",
                }],
                "currentDocument": { "exists": false },
            }]
        });
        let res = self.client.post(&url).json(&body).send().await?;
        Self::check(res).await?;
        Ok(())
    }

    /// PATCH fields on a document, creating it when missing (upsert). Only
    /// the masked fields are touched.
    pub async fn patch_document(
        &self,
        document_path: &str,
        fields: HashMap<String, FsValue>,
        mask: &[&str],
    ) -> Result<(), FirestoreError> {
        let mut url = format!("{}?", self.document_url(document_path));
        for (i, field) in mask.iter().enumerate() {
            if i > 0 {
                url.push('&');
            }
            url.push_str(&format!("updateMask.fieldPaths={}", field));
        }
        let body = json!({ "fields": fields });
        let res = self.client.patch(&url).json(&body).send().await?;
        Self::check(res).await?;
        Ok(())
    }

    /// GET a single document; None when it does not exist.
    pub async fn get_document(
        &self,
        document_path: &str,
    ) -> Result<Option<FsDocument>, FirestoreError> {
        let res = self
            .client
            .get(self.document_url(document_path))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = Self::check(res).await?;
        Ok(Some(res.json().await?))
    }

    /// List every document in a collection, ordered by `order_by` when given,
    /// following pagination to the end.
    pub async fn list_documents(
        &self,
        collection_path: &str,
        order_by: Option<&str>,
    ) -> Result<Vec<FsDocument>, FirestoreError> {
        let base = self.document_url(collection_path);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!("{}?pageSize=300", base);
            if let Some(field) = order_by {
                url.push_str(&format!("&orderBy={}", field));
            }
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={}", token));
            }
            let res = self.client.get(&url).send().await?;
            let res = Self::check(res).await?;
            let page: ListResponse = res.json().await?;
            documents.extend(page.documents);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(documents)
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, FirestoreError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(FirestoreError::Api(format!("{} {}", status, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn value_helpers_round_trip() {
        let at = Utc.with_ymd_and_hms(2025, 6, 3, 12, 30, 45).unwrap();
        assert_eq!(FsValue::string("hi").as_str(), Some("hi"));
        assert_eq!(FsValue::boolean(true).as_bool(), Some(true));
        assert_eq!(FsValue::timestamp(at).as_timestamp(), Some(at));
        assert_eq!(FsValue::string("hi").as_timestamp(), None);
    }

    #[test]
    fn map_values_nest() {
        let mut fields = HashMap::new();
        fields.insert("text".to_string(), FsValue::string("quoted"));
        let value = FsValue::map(fields);
        assert_eq!(
            value.as_map().and_then(|m| m.get("text")).and_then(FsValue::as_str),
            Some("quoted")
        );
    }

    #[test]
    fn serialized_values_use_firestore_field_names() {
        let encoded = serde_json::to_string(&FsValue::boolean(false)).unwrap();
        assert_eq!(encoded, r#"{"booleanValue":false}"#);
        let encoded = serde_json::to_string(&FsValue::string("x")).unwrap();
        assert_eq!(encoded, r#"{"stringValue":"x"}"#);
    }

    #[test]
    fn document_id_is_the_last_name_segment() {
        let doc: FsDocument = serde_json::from_str(
            r#"{"name":"projects/p/databases/(default)/documents/messages/abc123","fields":{}}"#,
        )
        .unwrap();
        assert_eq!(doc.id(), "abc123");
    }

    #[test]
    fn document_decoding_tolerates_missing_fields() {
        let doc: FsDocument = serde_json::from_str(
            r#"{"name":"projects/p/databases/(default)/documents/messages/m1",
                "fields":{"text":{"stringValue":"hello"},
                          "createdAt":{"timestampValue":"2025-06-03T12:00:00Z"}}}"#,
        )
        .unwrap();
        assert_eq!(doc.field("text").and_then(FsValue::as_str), Some("hello"));
        assert!(doc.field("createdAt").and_then(FsValue::as_timestamp).is_some());
        assert!(doc.field("deleted").is_none());
    }

    #[test]
    fn urls_target_the_default_database() {
        let client = FirestoreClient::new("demo-app", None);
        assert_eq!(
            client.document_url("messages/m1"),
            "https://firestore.googleapis.com/v1/projects/demo-app/databases/(default)/documents/messages/m1"
        );
        let emulated = FirestoreClient::new("demo-app", Some("127.0.0.1:8080"));
        assert!(emulated.document_url("users/u1").starts_with("http://127.0.0.1:8080/v1/"));
    }
}
