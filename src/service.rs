//! The form operations behind both the HTTP API and the CLI.
//!
//! `fill` is the only multi-step operation: read template → fill → store
//! the filled copy → append the log record. The filled copy and the record
//! are not written atomically; if the append fails the orphaned file is
//! logged and the error is returned.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::FormError;
use crate::fetch::ImageFetcher;
use crate::fill::PlaceholderFiller;
use crate::models::{FillOutcome, FillRecord, FillRequest, UploadOutcome};
use crate::records::FillRecordStore;
use crate::templates::TemplateStore;
use crate::version::version_tag;

pub struct FormService {
    config: Arc<Config>,
    templates: TemplateStore,
    filler: PlaceholderFiller,
    records: FillRecordStore,
}

impl FormService {
    pub async fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Result<Self, FormError> {
        let templates = TemplateStore::open(&config.storage.upload_dir).await?;
        let filler = PlaceholderFiller::new(fetcher, config.fetch.max_concurrent);
        Ok(Self {
            config,
            templates,
            filler,
            records: FillRecordStore::new(pool),
        })
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Public URL of a file in the upload directory.
    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.config.server.public_base_path.trim_end_matches('/'),
            name
        )
    }

    pub async fn list_templates(&self) -> Result<Vec<String>, FormError> {
        self.templates.list().await
    }

    pub async fn upload(&self, name: &str, bytes: &[u8]) -> Result<UploadOutcome, FormError> {
        self.templates.save(name, bytes).await?;
        tracing::info!(filename = %name, bytes = bytes.len(), "template uploaded");
        Ok(UploadOutcome {
            filename: name.to_string(),
            url: self.public_url(name),
        })
    }

    pub async fn fill(&self, request: &FillRequest) -> Result<FillOutcome, FormError> {
        let template = self.templates.read(&request.filename).await?;
        let version = version_tag(&request.filename);

        let (bytes, summary) = self.filler.fill(&template, &request.fields).await?;

        let now = Utc::now();
        let output = self
            .templates
            .save_filled(&request.filename, now.timestamp_millis(), &bytes)
            .await?;

        let record_id = match self
            .records
            .append(&request.filename, &version, &request.fields, now)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    output = %output,
                    template = %request.filename,
                    error = %e,
                    "filled output written but fill record not stored; output is orphaned"
                );
                return Err(e);
            }
        };

        tracing::info!(
            template = %request.filename,
            version = %version,
            output = %output,
            record_id,
            cells_replaced = summary.cells_replaced,
            images_embedded = summary.images_embedded,
            images_failed = summary.images_failed,
            "form filled"
        );

        Ok(FillOutcome {
            url: self.public_url(&output),
            output,
            record_id,
        })
    }

    pub async fn filled(&self) -> Result<Vec<FillRecord>, FormError> {
        self.records.list_all().await
    }
}

/// Validates a `{filename, data}` request body.
///
/// `filename` must be a non-empty string and `data` a JSON object.
pub fn parse_fill_request(body: &Value) -> Result<FillRequest, FormError> {
    let invalid = || FormError::InvalidInput("Invalid input".to_string());
    let object = body.as_object().ok_or_else(invalid)?;
    let filename = object
        .get("filename")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .ok_or_else(invalid)?;
    let fields = object
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(invalid)?;
    Ok(FillRequest {
        filename: filename.to_string(),
        fields: fields.clone(),
    })
}
