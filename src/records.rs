use crate::links::LookupId;
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const RECORD_HEADER: [&str; 4] = ["id", "lookupid", "set number", "Availability"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    /// 1-based position in the sorted link set.
    pub sequence_index: usize,
    pub lookup_id: LookupId,
    pub position_number: String,
    /// Always empty at harvest time.
    pub availability: String,
    pub asset_path: Option<PathBuf>,
}

impl ItemRecord {
    pub fn new(sequence_index: usize, lookup_id: LookupId, position_number: String) -> Self {
        Self {
            sequence_index,
            lookup_id,
            position_number,
            availability: String::new(),
            asset_path: None,
        }
    }

    pub fn with_asset(mut self, path: Option<PathBuf>) -> Self {
        self.asset_path = path;
        self
    }
}

/// Write `records` as `id,lookupid,set number,Availability`, replacing any existing file.
pub fn write_records_csv(path: &Path, records: &[ItemRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(RECORD_HEADER)?;
    for record in records {
        writer.write_record([
            record.sequence_index.to_string().as_str(),
            record.lookup_id.as_str(),
            record.position_number.as_str(),
            record.availability.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub total: usize,
    pub downloaded: usize,
    pub cached: usize,
    pub without_asset: usize,
    pub skipped_no_number: usize,
    pub failed: usize,
}

/// JSON summary of one catalog run, written next to the CSV output.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogManifest {
    pub run_id: String,
    pub config_id: Option<i64>,
    pub name: String,
    pub catalog_url: String,
    pub slug: String,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    /// `ready`, `verified`, `timed_out`, or `aborted`.
    pub listing: String,
    pub links_found: usize,
    pub found_by_scroll: usize,
    pub added_by_pagination: usize,
    pub scroll_rounds: usize,
    pub pagination_pages: usize,
    pub items: ItemCounts,
    pub records_written: usize,
    pub csv_path: Option<PathBuf>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub link: String,
    pub error: String,
}

pub fn write_manifest(dir: &Path, manifest: &CatalogManifest) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_{}.json", manifest.run_id, manifest.slug));
    let bytes = serde_json::to_vec_pretty(manifest)?;
    std::fs::write(&path, bytes)?;
    Ok(path)
}
