//! Image candidate collection and ranking for an item-detail view.
//!
//! Sources are read in a fixed precedence and pooled; the pool is then stably
//! sorted by declared width and de-duplicated. The markup scan is the last
//! source and only leads the ranking when every structured source is empty.

use crate::config::SiteProfile;
use crate::render::RenderView;
use crate::Result;
use regex::Regex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

const PICTURE_SOURCE_SELECTOR: &str = "picture source[srcset]";
const SOCIAL_META_SELECTOR: &str =
    "meta[property='og:image'], meta[name='og:image'], meta[name='twitter:image']";
const INLINE_STYLE_SELECTOR: &str = "[style*='background-image']";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    ProductImage,
    PictureSource,
    SocialMeta,
    InlineStyle,
    MarkupScan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageCandidate {
    pub url: String,
    /// Declared pixel width from a `srcset` descriptor; 0 when absent.
    pub weight: u32,
    pub source: CandidateSource,
}

impl ImageCandidate {
    fn new(url: String, weight: u32, source: CandidateSource) -> Self {
        Self {
            url,
            weight,
            source,
        }
    }
}

/// Pool every candidate the view exposes, in discovery order.
pub fn collect_candidates<V>(view: &mut V, profile: &SiteProfile) -> Result<Vec<ImageCandidate>>
where
    V: RenderView + ?Sized,
{
    let Ok(base) = Url::parse(&view.current_url()?) else {
        return Ok(Vec::new());
    };
    let mut pool: Vec<ImageCandidate> = Vec::new();

    for selector in &profile.image_selectors {
        for element in view.query(selector)? {
            for attr in &profile.image_attrs {
                if let Some(raw) = view.attribute(element, attr)? {
                    if let Some(url) = normalize_candidate_url(&raw, &base) {
                        pool.push(ImageCandidate::new(url, 0, CandidateSource::ProductImage));
                    }
                }
            }
            if let Some(srcset) = view.attribute(element, "srcset")? {
                pool.extend(
                    parse_srcset(&srcset, &base)
                        .into_iter()
                        .map(|(url, w)| ImageCandidate::new(url, w, CandidateSource::ProductImage)),
                );
            }
        }
    }

    for source in view.query(PICTURE_SOURCE_SELECTOR)? {
        if let Some(srcset) = view.attribute(source, "srcset")? {
            pool.extend(
                parse_srcset(&srcset, &base)
                    .into_iter()
                    .map(|(url, w)| ImageCandidate::new(url, w, CandidateSource::PictureSource)),
            );
        }
    }

    for meta in view.query(SOCIAL_META_SELECTOR)? {
        if let Some(content) = view.attribute(meta, "content")? {
            if let Some(url) = normalize_candidate_url(&content, &base) {
                pool.push(ImageCandidate::new(url, 0, CandidateSource::SocialMeta));
            }
        }
    }

    for element in view.query(INLINE_STYLE_SELECTOR)? {
        let Some(style) = view.attribute(element, "style")? else {
            continue;
        };
        if let Some(url) = background_image_url(&style).and_then(|raw| normalize_candidate_url(&raw, &base)) {
            pool.push(ImageCandidate::new(url, 0, CandidateSource::InlineStyle));
        }
    }

    let html = view.page_source()?;
    pool.extend(
        markup_image_urls(&html)
            .into_iter()
            .map(|url| ImageCandidate::new(url, 0, CandidateSource::MarkupScan)),
    );

    Ok(pool)
}

/// Widest first; ties keep discovery order; first occurrence of a URL wins.
pub fn rank_candidates(mut pool: Vec<ImageCandidate>) -> Vec<ImageCandidate> {
    pool.sort_by_key(|c| Reverse(c.weight));
    let mut seen = HashSet::new();
    pool.into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .collect()
}

pub fn ranked_urls(pool: Vec<ImageCandidate>) -> Vec<String> {
    rank_candidates(pool).into_iter().map(|c| c.url).collect()
}

/// Parse `url 800w, url 2x` descriptors into `(absolute url, width)`; non-width descriptors weigh 0.
pub fn parse_srcset(srcset: &str, base: &Url) -> Vec<(String, u32)> {
    let mut out = Vec::new();
    for chunk in srcset.split(',') {
        let bits: Vec<&str> = chunk.split_whitespace().collect();
        let Some(first) = bits.first() else {
            continue;
        };
        let Some(url) = normalize_candidate_url(first, base) else {
            continue;
        };
        let width = bits[1..]
            .iter()
            .find_map(|token| {
                let token = token.trim().to_ascii_lowercase();
                token.strip_suffix('w')?.parse::<u32>().ok()
            })
            .unwrap_or(0);
        out.push((url, width));
    }
    out
}

/// Absolute http(s) URL for `raw`; protocol-relative URLs become https.
pub fn normalize_candidate_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("javascript:") || lower.starts_with('#') {
        return None;
    }
    let joined = if let Some(rest) = raw.strip_prefix("//") {
        Url::parse(&format!("https://{rest}")).ok()?
    } else {
        base.join(raw).ok()?
    };
    if !matches!(joined.scheme(), "http" | "https") || joined.host_str().is_none() {
        return None;
    }
    Some(joined.to_string())
}

/// First `url(...)` in an inline `background-image` declaration, quotes optional.
pub fn background_image_url(style: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r#"(?i)background-image\s*:\s*url\(\s*(?:"([^"]+)"|'([^']+)'|([^)'"\s][^)'"]*))\s*\)"#,
        )
        .expect("background-image regex")
    });
    let caps = re.captures(style)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim().to_string())
}

/// Lowest-priority source: absolute image URLs anywhere in the markup, JSON-escaped slashes included.
pub fn markup_image_urls(html: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^"'<>\s]+?\.(?:jpg|jpeg|png|webp|gif|avif)\b"#)
            .expect("markup image regex")
    });
    let unescaped = html.replace("\\/", "/");
    re.find_iter(&unescaped)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderView;
    use crate::static_view::SnapshotView;

    const ITEM: &str = "https://shop.test/game/base-set/charizard-4";

    fn base() -> Url {
        Url::parse(ITEM).expect("base")
    }

    fn candidate(url: &str, weight: u32) -> ImageCandidate {
        ImageCandidate::new(url.to_string(), weight, CandidateSource::ProductImage)
    }

    #[test]
    fn ranking_orders_by_width_and_keeps_ties_stable() {
        let ranked = ranked_urls(vec![candidate("A", 400), candidate("B", 800), candidate("C", 0)]);
        assert_eq!(ranked, vec!["B", "A", "C"]);
    }

    #[test]
    fn ranking_dedupes_after_sort() {
        let ranked = ranked_urls(vec![
            candidate("small", 0),
            candidate("big", 1200),
            candidate("small", 300),
            candidate("other", 0),
            candidate("big", 0),
        ]);
        assert_eq!(ranked, vec!["big", "small", "other"]);
    }

    #[test]
    fn srcset_parses_widths_and_resolves_urls() {
        let parsed = parse_srcset(
            "/img/a-400.jpg 400w, //cdn.test/a-800.jpg 800w,  https://cdn.test/a.jpg 2x, ,",
            &base(),
        );
        assert_eq!(
            parsed,
            vec![
                ("https://shop.test/img/a-400.jpg".to_string(), 400),
                ("https://cdn.test/a-800.jpg".to_string(), 800),
                ("https://cdn.test/a.jpg".to_string(), 0),
            ]
        );
    }

    #[test]
    fn normalize_rejects_non_http_sources() {
        assert_eq!(normalize_candidate_url("data:image/png;base64,AAAA", &base()), None);
        assert_eq!(normalize_candidate_url("  ", &base()), None);
        assert_eq!(
            normalize_candidate_url("../jungle/x.png", &base()).as_deref(),
            Some("https://shop.test/game/jungle/x.png")
        );
    }

    #[test]
    fn background_image_accepts_quoted_and_bare_urls() {
        assert_eq!(
            background_image_url("color: red; background-image: url('/a.jpg')").as_deref(),
            Some("/a.jpg")
        );
        assert_eq!(
            background_image_url("BACKGROUND-IMAGE:url(\"https://x.test/b.png\")").as_deref(),
            Some("https://x.test/b.png")
        );
        assert_eq!(
            background_image_url("background-image: url( /c.webp )").as_deref(),
            Some("/c.webp")
        );
        assert_eq!(background_image_url("background: none"), None);
    }

    #[test]
    fn markup_scan_finds_absolute_image_urls_only() {
        let html = r#"<script>var d = {"img":"https:\/\/cdn.test\/p\/one.JPG"};</script>
            <a href="/relative.png">x</a> <p>https://cdn.test/two.webp?v=3</p>
            <p>https://cdn.test/page.html</p>"#;
        assert_eq!(
            markup_image_urls(html),
            vec!["https://cdn.test/p/one.JPG", "https://cdn.test/two.webp"]
        );
    }

    #[test]
    fn collect_pools_sources_in_precedence_order() {
        let html = r#"<html><head>
              <meta property="og:image" content="https://cdn.test/og.jpg">
            </head><body>
              <img id="product-image" src="/img/main.jpg"
                   srcset="/img/main-400.jpg 400w, /img/main-800.jpg 800w">
              <picture><source srcset="https://cdn.test/pic-1200.webp 1200w"></picture>
              <div style="background-image: url('//cdn.test/bg.png')"></div>
              <img class="unrelated" src="/img/logo.png">
            </body></html>"#;
        let mut view = SnapshotView::new().with_page(ITEM, html);
        view.navigate(ITEM).expect("nav");

        let pool = collect_candidates(&mut view, &SiteProfile::default()).expect("collect");
        let sources: Vec<CandidateSource> = pool.iter().map(|c| c.source).collect();
        assert_eq!(sources[0], CandidateSource::ProductImage);
        assert!(sources.contains(&CandidateSource::PictureSource));
        assert!(sources.contains(&CandidateSource::SocialMeta));
        assert!(sources.contains(&CandidateSource::InlineStyle));
        assert!(!pool.iter().any(|c| c.url.ends_with("logo.png") && c.source != CandidateSource::MarkupScan));

        let ranked = ranked_urls(pool);
        assert_eq!(
            &ranked[..4],
            &[
                "https://cdn.test/pic-1200.webp".to_string(),
                "https://shop.test/img/main-800.jpg".to_string(),
                "https://shop.test/img/main-400.jpg".to_string(),
                "https://shop.test/img/main.jpg".to_string(),
            ]
        );
        assert!(ranked.contains(&"https://cdn.test/og.jpg".to_string()));
        assert!(ranked.contains(&"https://cdn.test/bg.png".to_string()));
    }

    #[test]
    fn markup_scan_leads_only_when_structured_sources_are_empty() {
        let structured = r#"<html><body>
              <img class="product-image" src="https://cdn.test/real.jpg">
              <script>window.x = "https://cdn.test/noise.png";</script>
            </body></html>"#;
        let mut view = SnapshotView::new().with_page(ITEM, structured);
        view.navigate(ITEM).expect("nav");
        let ranked = rank_candidates(collect_candidates(&mut view, &SiteProfile::default()).expect("collect"));
        assert_eq!(ranked[0].source, CandidateSource::ProductImage);
        assert_eq!(ranked[0].url, "https://cdn.test/real.jpg");
        assert_eq!(ranked.last().map(|c| c.source), Some(CandidateSource::MarkupScan));

        let bare = r#"<html><body><script>window.x = "https://cdn.test/only.png";</script></body></html>"#;
        let mut view = SnapshotView::new().with_page(ITEM, bare);
        view.navigate(ITEM).expect("nav");
        let ranked = rank_candidates(collect_candidates(&mut view, &SiteProfile::default()).expect("collect"));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].source, CandidateSource::MarkupScan);
    }
}
