use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsizeTarget {
    pub width: u32,
    pub height: u32,
}

impl Default for UpsizeTarget {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 1600,
        }
    }
}

/// Larger-image guess for `url`: bump size query parameters, or failing that
/// drop a `-{W}x{H}` filename suffix. Returns `None` when nothing applies.
pub fn upsized_variant(url: &str, target: UpsizeTarget) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;

    let mut changed = false;
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let value = match k.to_ascii_lowercase().as_str() {
                "w" | "width" => {
                    changed = true;
                    target.width.to_string()
                }
                "h" | "height" => {
                    changed = true;
                    target.height.to_string()
                }
                "s" | "size" if v.trim().parse::<i64>().is_ok() => {
                    changed = true;
                    target.width.max(target.height).to_string()
                }
                _ => v.into_owned(),
            };
            (k.into_owned(), value)
        })
        .collect();

    if changed {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
        let out = parsed.to_string();
        return (out != url).then_some(out);
    }

    let stripped = strip_dimension_suffix(parsed.path())?;
    parsed.set_path(&stripped);
    Some(parsed.to_string())
}

/// `/a/thumb-200x200.jpg` → `/a/thumb.jpg`.
fn strip_dimension_suffix(path: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)-(\d+)x(\d+)(\.[a-z]+)$").expect("dimension suffix regex")
    });
    if !re.is_match(path) {
        return None;
    }
    Some(re.replace(path, "$3").into_owned())
}

/// Variants first (in candidate order), then every original; first occurrence wins.
pub fn with_upsized_variants(candidates: &[String], target: UpsizeTarget) -> Vec<String> {
    let variants = candidates
        .iter()
        .filter_map(|url| upsized_variant(url, target));
    let mut seen = HashSet::new();
    variants
        .chain(candidates.iter().cloned())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
