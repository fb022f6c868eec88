use crate::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Canonical absolute URL of an item-detail page: query and fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemLink(String);

impl ItemLink {
    /// Resolve `href` against `base` and keep it only if it sits under `/{namespace}/{slug}/`.
    pub fn from_href(href: &str, base: &Url, namespace: &str, slug: &str) -> Option<Self> {
        let href = href.trim();
        if href.is_empty() || slug.is_empty() {
            return None;
        }
        let mut joined = base.join(href).ok()?;
        if !matches!(joined.scheme(), "http" | "https") {
            return None;
        }
        if !is_item_path(joined.path(), namespace, slug) {
            return None;
        }
        joined.set_query(None);
        joined.set_fragment(None);
        Some(Self(joined.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lookup_id(&self, namespace: &str) -> LookupId {
        LookupId::from_url(&self.0, namespace)
    }
}

impl fmt::Display for ItemLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemLink {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn is_item_path(path: &str, namespace: &str, slug: &str) -> bool {
    path.starts_with(&format!("/{namespace}/{slug}/"))
}

/// Stable item identifier: `set-name/card's-name-12` for `/game/set-name/card%27s-name-12`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LookupId(String);

impl LookupId {
    pub fn from_url(url: &str, namespace: &str) -> Self {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
        };
        let trimmed = path.trim_matches('/');
        let prefix = format!("{namespace}/");
        let stripped = trimmed.strip_prefix(&prefix).unwrap_or(trimmed);
        let decoded = urlencoding::decode_binary(stripped.as_bytes());
        Self(String::from_utf8_lossy(&decoded).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LookupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last non-empty path segment of a catalog URL.
pub fn slug_from_catalog_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .unwrap_or("")
        .to_string()
}

pub fn parse_catalog_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|e| HarvestError::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(HarvestError::InvalidUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme {other}; only http/https are allowed"),
            });
        }
    }
    if parsed.host_str().is_none() {
        return Err(HarvestError::InvalidUrl {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.example.test/console/base-set?sort=model-number").expect("base")
    }

    #[test]
    fn lookup_id_strips_namespace_and_decodes() {
        let id = LookupId::from_url(
            "https://www.example.test/game/set-name/card%27s-name-12",
            "game",
        );
        assert_eq!(id.as_str(), "set-name/card's-name-12");

        let from_path = LookupId::from_url("/game/set-name/card%27s-name-12", "game");
        assert_eq!(from_path.as_str(), "set-name/card's-name-12");
    }

    #[test]
    fn lookup_id_decodes_multibyte_escapes() {
        let id = LookupId::from_url("https://x.test/game/pok%C3%A9mon-go/mewtwo%20gx-72", "game");
        assert_eq!(id.as_str(), "pokémon-go/mewtwo gx-72");
    }

    #[test]
    fn lookup_id_keeps_malformed_escapes() {
        let id = LookupId::from_url("https://x.test/game/set/100%-rare%2", "game");
        assert_eq!(id.as_str(), "set/100%-rare%2");
    }

    #[test]
    fn item_link_filters_by_slug_and_strips_query() {
        let link = ItemLink::from_href("/game/base-set/charizard-4?q=1#top", &base(), "game", "base-set")
            .expect("link");
        assert_eq!(link.as_str(), "https://www.example.test/game/base-set/charizard-4");

        assert!(ItemLink::from_href("/game/jungle/pikachu-60", &base(), "game", "base-set").is_none());
        assert!(ItemLink::from_href("/game/base-set", &base(), "game", "base-set").is_none());
        assert!(ItemLink::from_href("javascript:void(0)", &base(), "game", "base-set").is_none());
        assert!(ItemLink::from_href(
            "https://www.example.test/game/base-set-2/x",
            &base(),
            "game",
            "base-set"
        )
        .is_none());
    }

    #[test]
    fn slug_is_last_non_empty_segment() {
        let url = Url::parse("https://www.example.test/console/pokemon-base-set/").expect("url");
        assert_eq!(slug_from_catalog_url(&url), "pokemon-base-set");
        let root = Url::parse("https://www.example.test/").expect("url");
        assert_eq!(slug_from_catalog_url(&root), "");
    }

    #[test]
    fn parse_catalog_url_allows_http_https_only() {
        assert!(parse_catalog_url("https://example.com/console/x").is_ok());
        assert!(parse_catalog_url("http://example.com/console/x").is_ok());
        assert!(parse_catalog_url("ftp://example.com/x").is_err());
        assert!(parse_catalog_url("not a url").is_err());
    }
}
