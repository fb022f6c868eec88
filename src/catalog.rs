use crate::links::{parse_catalog_url, slug_from_catalog_url};
use crate::{HarvestError, Result};
use csv::{ReaderBuilder, StringRecord};
use std::collections::BTreeSet;
use std::path::Path;
use url::Url;

const ID_HEADERS: &[&str] = &["id", "ID", "Id"];
const NAME_HEADERS: &[&str] = &["Name", "name"];
const LINK_HEADERS: &[&str] = &["link", "url"];
const DELIMITER_CANDIDATES: &[u8] = b";,\t|";
const DELIMITER_SAMPLE_BYTES: usize = 4096;

/// One harvesting run: a named catalog and the slug its item links must carry.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTarget {
    pub config_id: Option<i64>,
    pub name: String,
    pub base_url: Url,
    pub slug: String,
}

impl CatalogTarget {
    pub fn new(config_id: Option<i64>, name: &str, url: &str) -> Result<Self> {
        let base_url = parse_catalog_url(url)?;
        let slug = slug_from_catalog_url(&base_url);
        if slug.is_empty() {
            return Err(HarvestError::InvalidUrl {
                url: url.trim().to_string(),
                reason: "catalog URL has no path segment to use as slug".to_string(),
            });
        }
        Ok(Self {
            config_id,
            name: name.trim().to_string(),
            base_url,
            slug,
        })
    }

    /// Catalog URL with `sort={sort_key}` added when no sort parameter is present.
    pub fn sorted_url(&self, sort_key: &str) -> String {
        if self.base_url.query_pairs().any(|(k, _)| k == "sort") {
            return self.base_url.to_string();
        }
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        format!("{url}?sort={sort_key}")
    }

    /// Output CSV file name: whitespace runs become `_`.
    pub fn output_file_name(&self) -> String {
        let joined = self.name.split_whitespace().collect::<Vec<_>>().join("_");
        let safe: String = joined
            .chars()
            .map(|ch| match ch {
                '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
                c => c,
            })
            .collect();
        format!("{safe}.csv")
    }
}

/// A config row normalized from whichever header spelling the file used.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub id: Option<i64>,
    pub id_raw: String,
    pub name: String,
    pub link: String,
}

impl CatalogRow {
    pub fn to_target(&self) -> Result<CatalogTarget> {
        CatalogTarget::new(self.id, &self.name, &self.link)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub only_id: Option<i64>,
    pub only_ids: Option<BTreeSet<i64>>,
    pub only_name: Option<String>,
}

impl RowFilter {
    pub fn is_empty(&self) -> bool {
        self.only_id.is_none() && self.only_ids.is_none() && self.only_name.is_none()
    }

    pub fn accepts(&self, row: &CatalogRow) -> bool {
        if let Some(id) = self.only_id {
            if row.id != Some(id) {
                return false;
            }
        }
        if let Some(ids) = &self.only_ids {
            match row.id {
                Some(id) if ids.contains(&id) => {}
                _ => return false,
            }
        }
        if let Some(needle) = &self.only_name {
            if !row.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(id) = self.only_id {
            parts.push(format!("only_id={id}"));
        }
        if let Some(ids) = &self.only_ids {
            parts.push(format!("only_ids={ids:?}"));
        }
        if let Some(name) = &self.only_name {
            parts.push(format!("only_name~={name:?}"));
        }
        parts.join(" ")
    }
}

/// `"3,7 12"` → `{3, 7, 12}`; non-numeric parts are ignored, empty → `None`.
pub fn parse_id_list(raw: &str) -> Option<BTreeSet<i64>> {
    let ids: BTreeSet<i64> = raw
        .split(|ch: char| ch.is_whitespace() || ch == ',' || ch == ';')
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

pub fn detect_delimiter(sample: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0_usize;
    for &candidate in DELIMITER_CANDIDATES {
        let count = sample.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Read catalog rows. Rows missing a name or link are skipped; no rows at all is fatal.
pub fn read_catalog_config(path: &Path) -> Result<Vec<CatalogRow>> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);
    let text = text.trim_start_matches('\u{feff}');
    let sample_end = text
        .char_indices()
        .map(|(idx, _)| idx)
        .find(|idx| *idx >= DELIMITER_SAMPLE_BYTES)
        .unwrap_or(text.len());
    let delimiter = detect_delimiter(&text[..sample_end]);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let id_col = find_column(&headers, ID_HEADERS);
    let name_col = find_column(&headers, NAME_HEADERS);
    let link_col = find_column(&headers, LINK_HEADERS);
    let (Some(name_col), Some(link_col)) = (name_col, link_col) else {
        return Err(HarvestError::CatalogConfigInvalid {
            path: path.to_path_buf(),
            message: format!(
                "expected a name column ({}) and a link column ({}); found {:?}",
                NAME_HEADERS.join("/"),
                LINK_HEADERS.join("/"),
                headers.iter().collect::<Vec<_>>()
            ),
        });
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = record.get(name_col).unwrap_or("").trim().to_string();
        let link = record.get(link_col).unwrap_or("").trim().to_string();
        if name.is_empty() || link.is_empty() {
            continue;
        }
        let id_raw = id_col
            .and_then(|col| record.get(col))
            .unwrap_or("")
            .trim()
            .to_string();
        rows.push(CatalogRow {
            id: id_raw.parse::<i64>().ok(),
            id_raw,
            name,
            link,
        });
    }

    if rows.is_empty() {
        return Err(HarvestError::NoCatalogRows(path.to_path_buf()));
    }
    Ok(rows)
}

/// Header lookup in alias order, so an exact `id` beats `ID`.
fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.csv");
        std::fs::write(&path, contents).expect("write");
        (dir, path)
    }

    #[test]
    fn reads_semicolon_config_with_bom_and_aliases() {
        let (_dir, path) = write_config(
            "\u{feff}ID;name;url\n1;Base Set;https://shop.test/console/base-set\n2;;https://shop.test/console/jungle\nx;Fossil;https://shop.test/console/fossil\n",
        );
        let rows = read_catalog_config(&path).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(1));
        assert_eq!(rows[0].name, "Base Set");
        assert_eq!(rows[1].id, None);
        assert_eq!(rows[1].id_raw, "x");
    }

    #[test]
    fn reads_comma_config_without_id_column() {
        let (_dir, path) = write_config("Name,link\nBase Set,https://shop.test/console/base-set\n");
        let rows = read_catalog_config(&path).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, None);
        assert_eq!(rows[0].link, "https://shop.test/console/base-set");
    }

    #[test]
    fn config_without_usable_rows_is_fatal() {
        let (_dir, path) = write_config("id,Name,link\n1,,\n");
        assert!(matches!(
            read_catalog_config(&path),
            Err(HarvestError::NoCatalogRows(_))
        ));

        let (_dir2, path2) = write_config("id,title\n1,x\n");
        assert!(matches!(
            read_catalog_config(&path2),
            Err(HarvestError::CatalogConfigInvalid { .. })
        ));
    }

    #[test]
    fn delimiter_detection_prefers_most_frequent() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter("a\tb\n1\t2"), b'\t');
        assert_eq!(detect_delimiter("a|b|c"), b'|');
        assert_eq!(detect_delimiter("plain"), b',');
    }

    #[test]
    fn target_derives_slug_and_sorted_url() {
        let target = CatalogTarget::new(Some(3), " Base Set ", "https://shop.test/console/base-set/")
            .expect("target");
        assert_eq!(target.slug, "base-set");
        assert_eq!(target.name, "Base Set");
        assert_eq!(
            target.sorted_url("model-number"),
            "https://shop.test/console/base-set/?sort=model-number"
        );
        assert_eq!(target.output_file_name(), "Base_Set.csv");

        let sorted = CatalogTarget::new(None, "X", "https://shop.test/console/x?sort=price")
            .expect("target");
        assert_eq!(sorted.sorted_url("model-number"), "https://shop.test/console/x?sort=price");

        assert!(CatalogTarget::new(None, "Root", "https://shop.test/").is_err());
    }

    #[test]
    fn row_filter_combines_id_and_name() {
        let row = CatalogRow {
            id: Some(7),
            id_raw: "7".to_string(),
            name: "Pokemon Jungle".to_string(),
            link: "https://shop.test/console/jungle".to_string(),
        };
        assert!(RowFilter::default().accepts(&row));
        let filter = RowFilter {
            only_ids: parse_id_list("3,7 12"),
            only_name: Some("JUNGLE".to_string()),
            ..RowFilter::default()
        };
        assert!(filter.accepts(&row));
        let miss = RowFilter {
            only_id: Some(3),
            ..RowFilter::default()
        };
        assert!(!miss.accepts(&row));
        assert_eq!(parse_id_list(" , ;"), None);
    }
}
