//! Tabular database REST client
//!
//! Thin client for an Airtable-style records API. A table is addressed by
//! base id and table name; records are flat field maps. Attachment fields
//! are `[{"url": ...}]` lists; the service fetches the image itself and
//! later augments the attachment with generated `thumbnails`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::IniConfig;
use crate::{Error, Result};

const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

/// One record of a table: opaque id plus field map.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Fetch a string field, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    records: Vec<Record>,
    offset: Option<String>,
}

#[derive(Debug, Serialize)]
struct FieldsBody<'a> {
    fields: &'a Map<String, Value>,
}

/// Client bound to one table of one base.
#[derive(Debug, Clone)]
pub struct TableClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    base_id: String,
    table_name: String,
}

impl TableClient {
    pub fn new(api_url: &str, api_key: &str, base_id: &str, table_name: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            base_id: base_id.to_string(),
            table_name: table_name.to_string(),
        }
    }

    /// Build a client from an INI config (`api_key`, `base_id`,
    /// `table_name`, optional `api_url`).
    pub fn from_config(config: &IniConfig) -> Result<Self> {
        Ok(Self::new(
            config.get_or("api_url", DEFAULT_API_URL),
            config.get("api_key")?,
            config.get("base_id")?,
            config.get("table_name")?,
        ))
    }

    /// Same base and credentials, different table.
    pub fn for_table(&self, table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            ..self.clone()
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn table_url(&self) -> String {
        format!("{}/{}/{}", self.api_url, self.base_id, self.table_name)
    }

    fn record_url(&self, record_id: &str) -> String {
        format!("{}/{}", self.table_url(), record_id)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Api(status.as_u16(), body))
        }
    }

    /// Create a record and return it (with the server-assigned id).
    pub async fn create(&self, fields: &Map<String, Value>) -> Result<Record> {
        let response = self
            .http
            .post(self.table_url())
            .bearer_auth(&self.api_key)
            .json(&FieldsBody { fields })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch one record by id.
    pub async fn get(&self, record_id: &str) -> Result<Record> {
        let response = self
            .http
            .get(self.record_url(record_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Patch fields of an existing record.
    pub async fn update(&self, record_id: &str, fields: &Map<String, Value>) -> Result<Record> {
        let response = self
            .http
            .patch(self.record_url(record_id))
            .bearer_auth(&self.api_key)
            .json(&FieldsBody { fields })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// List every record of the table, following pagination offsets.
    pub async fn list_all(&self) -> Result<Vec<Record>> {
        self.list(None).await
    }

    /// List records matching a filter formula.
    pub async fn find_by_formula(&self, formula: &str) -> Result<Vec<Record>> {
        self.list(Some(formula)).await
    }

    async fn list(&self, formula: Option<&str>) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut request = self.http.get(self.table_url()).bearer_auth(&self.api_key);
            if let Some(f) = formula {
                request = request.query(&[("filterByFormula", f)]);
            }
            if let Some(o) = &offset {
                request = request.query(&[("offset", o)]);
            }
            let page: RecordPage = Self::check(request.send().await?)
                .await?
                .json()
                .await?;
            records.extend(page.records);
            match page.offset {
                Some(o) => offset = Some(o),
                None => break,
            }
        }
        Ok(records)
    }
}

/// Build a single-attachment field value from a URL.
pub fn attachment_from_url(url: &str) -> Value {
    serde_json::json!([{ "url": url }])
}

/// True once the service has generated thumbnails for the first attachment
/// of the given field. This is the signal that the remote side has finished
/// fetching the externally hosted image.
pub fn has_thumbnails(record: &Record, field: &str) -> bool {
    record
        .fields
        .get(field)
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_object)
        .map(|attachment| attachment.contains_key("thumbnails"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_has_url_list_form() {
        let v = attachment_from_url("https://host/img.png");
        assert_eq!(v[0]["url"], "https://host/img.png");
    }

    #[test]
    fn thumbnails_detection() {
        let mut record = Record {
            id: "rec1".into(),
            fields: Map::new(),
        };
        assert!(!has_thumbnails(&record, "PSF_Image"));

        record.fields.insert(
            "PSF_Image".into(),
            serde_json::json!([{ "url": "https://host/img.png" }]),
        );
        assert!(!has_thumbnails(&record, "PSF_Image"));

        record.fields.insert(
            "PSF_Image".into(),
            serde_json::json!([{
                "url": "https://host/img.png",
                "thumbnails": { "small": { "url": "https://host/t.png" } }
            }]),
        );
        assert!(has_thumbnails(&record, "PSF_Image"));
    }
}
