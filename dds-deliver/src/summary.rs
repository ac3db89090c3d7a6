//! End-of-session summary: what was delivered, what failed and why.

use crate::cascade::RecordMap;
use crate::download::{DownloadItem, DownloadStatus};
use crate::error::DeliveryResult;
use crate::record::DeliveryRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Column width the error text is wrapped to when rendered.
pub const WRAP_WIDTH: usize = 100;

/// File the failed rows are written to inside the logs directory.
pub const FAILED_REPORT_NAME: &str = "dds_failed_delivery.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub item: String,
    /// Location for delivered rows, error text for failed ones.
    pub detail: String,
}

impl SummaryRow {
    fn new(item: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub delivered: Vec<SummaryRow>,
    pub failed: Vec<SummaryRow>,
    /// Downloads left alone because the output already existed.
    pub skipped: Vec<SummaryRow>,
}

impl DeliverySummary {
    /// Builds the upload summary. Directory groups collapse into one row.
    pub fn from_records(records: &RecordMap, bucket: &str, project_id: &str) -> Self {
        let mut summary = Self::default();
        let mut groups: BTreeMap<&Path, Vec<&DeliveryRecord>> = BTreeMap::new();

        let mut singles: Vec<&DeliveryRecord> = Vec::new();
        for record in records.values() {
            match record.directory_group.as_deref() {
                Some(group) => groups.entry(group).or_default().push(record),
                None => singles.push(record),
            }
        }
        singles.sort_by(|a, b| a.source.cmp(&b.source));

        for record in singles {
            let item = record.source.display().to_string();
            if record.is_delivered() {
                summary
                    .delivered
                    .push(SummaryRow::new(item, location(bucket, &record.target_key)));
            } else {
                summary.failed.push(SummaryRow::new(item, record.error()));
            }
        }

        for (group, mut members) in groups {
            members.sort_by(|a, b| a.source.cmp(&b.source));
            let failed: Vec<&&DeliveryRecord> =
                members.iter().filter(|r| !r.is_delivered()).collect();

            let item = group.display().to_string();
            if failed.is_empty() {
                let name = group
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                summary.delivered.push(SummaryRow::new(
                    item,
                    location(bucket, &format!("{project_id}/{name}")),
                ));
                continue;
            }

            // The root failure is the one nothing else caused.
            let root = failed
                .iter()
                .find(|r| r.cancelled_by().is_none())
                .or_else(|| failed.first());
            let error = root.map(|r| r.error()).unwrap_or_default();
            summary.failed.push(SummaryRow::new(
                item,
                format!("{} of {} file(s) not delivered: {error}", failed.len(), members.len()),
            ));

            // Files that made it before the failure are still in the bucket.
            for record in members.iter().filter(|r| r.is_delivered()) {
                summary.delivered.push(SummaryRow::new(
                    record.source.display().to_string(),
                    location(bucket, &record.target_key),
                ));
            }
        }
        summary
    }

    pub fn from_downloads(items: &[DownloadItem]) -> Self {
        let mut summary = Self::default();
        for item in items {
            match &item.status {
                DownloadStatus::Delivered { path, .. } => summary
                    .delivered
                    .push(SummaryRow::new(&item.item, path.display().to_string())),
                DownloadStatus::Skipped { path } => summary.skipped.push(SummaryRow::new(
                    &item.item,
                    format!("{} already exists", path.display()),
                )),
                DownloadStatus::Failed { error } => {
                    summary.failed.push(SummaryRow::new(&item.item, error))
                }
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Two-column text table, one section per outcome.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (title, header, rows) in [
            ("Delivered", "Location", &self.delivered),
            ("Skipped", "Reason", &self.skipped),
            ("Failed", "Error", &self.failed),
        ] {
            if rows.is_empty() {
                continue;
            }
            let width = rows
                .iter()
                .map(|r| r.item.chars().count())
                .chain(std::iter::once(4))
                .max()
                .unwrap_or(4);
            out.push_str(&format!("{title}\n"));
            out.push_str(&format!("  {:<width$}  {header}\n", "Item"));
            for row in rows {
                let lines = wrap_text(&row.detail, WRAP_WIDTH);
                let mut lines = lines.iter();
                let first = lines.next().map(String::as_str).unwrap_or_default();
                out.push_str(&format!("  {:<width$}  {first}\n", row.item));
                for line in lines {
                    out.push_str(&format!("  {:<width$}  {line}\n", ""));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Writes the failed rows to the logs directory when there are any.
    pub fn write_failed_report(&self, logs_dir: &Path) -> DeliveryResult<Option<PathBuf>> {
        if self.failed.is_empty() {
            return Ok(None);
        }
        let rows: BTreeMap<&str, &str> = self
            .failed
            .iter()
            .map(|r| (r.item.as_str(), r.detail.as_str()))
            .collect();
        let path = logs_dir.join(FAILED_REPORT_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(&rows)?)?;
        warn!(
            "{} item(s) failed; details written to {}",
            self.failed.len(),
            path.display()
        );
        Ok(Some(path))
    }

    pub fn log(&self) {
        info!(
            "{} delivered, {} skipped, {} failed",
            self.delivered.len(),
            self.skipped.len(),
            self.failed.len()
        );
    }
}

fn location(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// Greedy word wrap. Words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let len = line.chars().count();
        if len > 0 && len + 1 + word.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.extend(word);
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}
