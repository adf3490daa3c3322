//! Placeholder filling for spreadsheet templates.
//!
//! A fill runs in three passes:
//!
//! 1. scan every text cell of every sheet and plan it (text replacement or
//!    signature image);
//! 2. download all signature images, at most `max_concurrent` at a time;
//! 3. apply text edits and anchor the downloaded images, then serialize.
//!
//! A failed download only affects its own cell, which keeps its
//! placeholder text. Every other failure aborts the fill.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::FormError;
use crate::fetch::ImageFetcher;
use crate::models::{FieldMap, TemplateFormat, TemplateHandle};
use crate::placeholder::{plan_cell, CellPlan};
use crate::xlsx::{CellPos, ImagePlacement, PackageError, Workbook};

/// A signature cell waiting for its image.
#[derive(Debug, Clone)]
struct SignatureJob {
    sheet: usize,
    pos: CellPos,
    key: String,
    url: String,
}

/// Counters describing what a fill did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub cells_replaced: usize,
    pub images_embedded: usize,
    pub images_failed: usize,
}

pub struct PlaceholderFiller {
    fetcher: Arc<dyn ImageFetcher>,
    max_concurrent: usize,
}

impl PlaceholderFiller {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Fills `template` with `fields` and returns the new workbook bytes.
    pub async fn fill(
        &self,
        template: &TemplateHandle,
        fields: &FieldMap,
    ) -> Result<(Vec<u8>, FillSummary), FormError> {
        if template.format != Some(TemplateFormat::Xlsx) {
            return Err(FormError::UnsupportedFormat(template.name.clone()));
        }
        let invalid = |e: PackageError| FormError::invalid_template(&template.name, e);

        let mut workbook = Workbook::open(&template.bytes).map_err(invalid)?;
        let sheet_count = workbook.sheets().len();

        let mut edits: Vec<HashMap<CellPos, String>> = vec![HashMap::new(); sheet_count];
        let mut jobs = Vec::new();
        let mut summary = FillSummary::default();

        for (sheet, sheet_edits) in edits.iter_mut().enumerate() {
            for cell in workbook.text_cells(sheet).map_err(invalid)? {
                match plan_cell(&cell.text, fields) {
                    CellPlan::Keep => {}
                    CellPlan::Replace(text) => {
                        sheet_edits.insert(cell.pos, text);
                        summary.cells_replaced += 1;
                    }
                    CellPlan::Signature { key, url } => jobs.push(SignatureJob {
                        sheet,
                        pos: cell.pos,
                        key,
                        url,
                    }),
                }
            }
        }

        let fetched = self.fetch_all(&jobs).await;

        let mut images: Vec<Vec<ImagePlacement>> = vec![Vec::new(); sheet_count];
        for (job, png) in jobs.into_iter().zip(fetched) {
            match png {
                Some(png) => {
                    edits[job.sheet].insert(job.pos, String::new());
                    images[job.sheet].push(ImagePlacement { pos: job.pos, png });
                    summary.images_embedded += 1;
                }
                None => summary.images_failed += 1,
            }
        }

        for sheet in 0..sheet_count {
            workbook
                .update_sheet(sheet, &edits[sheet], &images[sheet])
                .map_err(invalid)?;
        }

        let bytes = workbook.to_bytes().map_err(invalid)?;
        Ok((bytes, summary))
    }

    /// Downloads every job's image; `None` marks a failed download.
    /// Results are in job order regardless of completion order.
    async fn fetch_all(&self, jobs: &[SignatureJob]) -> Vec<Option<Vec<u8>>> {
        let mut results: Vec<Option<Vec<u8>>> = vec![None; jobs.len()];
        if jobs.is_empty() {
            return results;
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for (idx, job) in jobs.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let permits = Arc::clone(&permits);
            let url = job.url.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, fetcher.fetch(&url).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(bytes))) => results[idx] = Some(bytes),
                Ok((idx, Err(e))) => {
                    let job = &jobs[idx];
                    tracing::warn!(
                        key = %job.key,
                        cell = %job.pos,
                        error = %e,
                        "image fetch error, keeping placeholder"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "image fetch task failed"),
            }
        }
        results
    }
}
