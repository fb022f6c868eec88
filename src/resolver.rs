//! Per-item asset resolution: rank candidate images on a rendered detail
//! page, optionally prepend upsized variants, and download the first one that
//! works.

use crate::candidates::{collect_candidates, rank_candidates};
use crate::config::{HarvestSettings, SiteProfile};
use crate::fetch::{copy_and_hash, download_first_ok, find_existing_asset, FetchAttempt, ImageFetch, SavedAsset};
use crate::links::LookupId;
use crate::logs::redact_url_for_log;
use crate::render::RenderView;
use crate::session::{sync_cookies, HttpSession};
use crate::upsize::{with_upsized_variants, UpsizeTarget};
use crate::Result;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOptions {
    pub skip_cached: bool,
    pub upsize: Option<UpsizeTarget>,
    pub download_timeout: Duration,
    /// Log full candidate URLs instead of redacted origins.
    pub debug_images: bool,
}

impl ResolveOptions {
    pub fn from_settings(settings: &HarvestSettings) -> Self {
        Self {
            skip_cached: settings.skip_cached,
            upsize: settings.upsize.then_some(UpsizeTarget {
                width: settings.upsize_width,
                height: settings.upsize_height,
            }),
            download_timeout: settings.download_timeout(),
            debug_images: settings.debug_images,
        }
    }
}

/// What the resolver is working on: the detail page (also sent as `Referer`),
/// its lookup id, and the extension-less destination path.
#[derive(Debug, Clone, Copy)]
pub struct ResolveTarget<'a> {
    pub referer: &'a str,
    pub lookup_id: &'a LookupId,
    pub destination_base: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAsset {
    pub lookup_id: LookupId,
    pub local_path: PathBuf,
    pub extension: String,
    /// Empty for cache hits.
    pub source_url: String,
    pub bytes: u64,
    pub sha256: String,
}

impl ResolvedAsset {
    fn downloaded(lookup_id: &LookupId, saved: SavedAsset) -> Self {
        Self {
            lookup_id: lookup_id.clone(),
            local_path: saved.path,
            extension: saved.extension,
            source_url: saved.url,
            bytes: saved.bytes,
            sha256: saved.sha256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Cached(ResolvedAsset),
    Downloaded(ResolvedAsset),
    NoCandidates,
    Exhausted { attempts: usize },
}

impl ResolveOutcome {
    pub fn asset(&self) -> Option<&ResolvedAsset> {
        match self {
            Self::Cached(asset) | Self::Downloaded(asset) => Some(asset),
            Self::NoCandidates | Self::Exhausted { .. } => None,
        }
    }
}

/// Existing non-empty asset for `destination_base`, described without any network access.
pub fn cached_asset(lookup_id: &LookupId, destination_base: &Path) -> Result<Option<ResolvedAsset>> {
    let Some(path) = find_existing_asset(destination_base) else {
        return Ok(None);
    };
    let (bytes, sha256) = file_digest(&path)?;
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    Ok(Some(ResolvedAsset {
        lookup_id: lookup_id.clone(),
        local_path: path,
        extension,
        source_url: String::new(),
        bytes,
        sha256,
    }))
}

fn file_digest(path: &Path) -> Result<(u64, String)> {
    let mut file = std::fs::File::open(path)?;
    Ok(copy_and_hash(&mut file, &mut std::io::sink())?)
}

pub fn resolve_and_fetch<V, S, FLog>(
    view: &mut V,
    target: ResolveTarget<'_>,
    session: &mut S,
    profile: &SiteProfile,
    options: &ResolveOptions,
    mut log_line: FLog,
) -> Result<ResolveOutcome>
where
    V: RenderView + ?Sized,
    S: HttpSession + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let shown = |url: &str| {
        if options.debug_images {
            url.to_string()
        } else {
            redact_url_for_log(url)
        }
    };

    if options.skip_cached {
        if let Some(asset) = cached_asset(target.lookup_id, target.destination_base)? {
            log_line(
                "info",
                "asset_cached",
                serde_json::json!({
                    "lookup_id": target.lookup_id,
                    "path": asset.local_path,
                }),
            )?;
            return Ok(ResolveOutcome::Cached(asset));
        }
    }

    let pool = match collect_candidates(view, profile) {
        Ok(pool) => pool,
        Err(err) => {
            log_line(
                "warn",
                "asset_candidates_failed",
                serde_json::json!({
                    "lookup_id": target.lookup_id,
                    "error": err.to_string(),
                }),
            )?;
            Vec::new()
        }
    };
    let ranked: Vec<String> = rank_candidates(pool).into_iter().map(|c| c.url).collect();
    let urls = match options.upsize {
        Some(upsize) => with_upsized_variants(&ranked, upsize),
        None => ranked,
    };

    if options.debug_images {
        log_line(
            "debug",
            "asset_candidates",
            serde_json::json!({
                "lookup_id": target.lookup_id,
                "candidates": urls,
            }),
        )?;
    }
    if urls.is_empty() {
        log_line(
            "warn",
            "asset_no_candidates",
            serde_json::json!({ "lookup_id": target.lookup_id }),
        )?;
        return Ok(ResolveOutcome::NoCandidates);
    }

    if let Err(err) = sync_cookies(view, session, &profile.default_cookie_domain) {
        log_line(
            "warn",
            "cookie_sync_failed",
            serde_json::json!({
                "lookup_id": target.lookup_id,
                "error": err.to_string(),
            }),
        )?;
    }

    let fetch = ImageFetch {
        referer: target.referer,
        user_agent: &profile.user_agent,
        timeout: options.download_timeout,
    };
    let report = download_first_ok(session, &urls, &fetch, target.destination_base, |_| {});
    for attempt in &report.attempts {
        if let FetchAttempt::Failed { url, reason } = attempt {
            log_line(
                "debug",
                "asset_attempt_failed",
                serde_json::json!({
                    "lookup_id": target.lookup_id,
                    "url": shown(url),
                    "reason": reason,
                }),
            )?;
        }
    }

    let attempts = report.attempts.len();
    match report.into_saved() {
        Some(saved) => {
            log_line(
                "info",
                "asset_saved",
                serde_json::json!({
                    "lookup_id": target.lookup_id,
                    "url": shown(&saved.url),
                    "path": saved.path,
                    "bytes": saved.bytes,
                    "attempts": attempts,
                }),
            )?;
            Ok(ResolveOutcome::Downloaded(ResolvedAsset::downloaded(
                target.lookup_id,
                saved,
            )))
        }
        None => {
            log_line(
                "warn",
                "asset_exhausted",
                serde_json::json!({
                    "lookup_id": target.lookup_id,
                    "attempts": attempts,
                }),
            )?;
            Ok(ResolveOutcome::Exhausted { attempts })
        }
    }
}

fn position_number_in(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"#\s*(\d+)").expect("position number regex"));
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Digits after `#` in the first heading matched by `position_selectors`.
/// The document title is consulted only when the page has no heading at all;
/// empty when absent.
pub fn extract_position_number<V>(view: &mut V, profile: &SiteProfile) -> String
where
    V: RenderView + ?Sized,
{
    let heading = profile.position_selectors.iter().find_map(|selector| {
        view.query(selector)
            .ok()
            .and_then(|handles| handles.first().copied())
    });
    let text = match heading {
        Some(handle) => view.text(handle).ok(),
        None => view.title().ok(),
    };
    text.as_deref().and_then(position_number_in).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ScriptedReply, ScriptedSession};
    use crate::static_view::SnapshotView;

    const ITEM: &str = "https://www.shop.test/game/base-set/charizard-4";

    fn options() -> ResolveOptions {
        ResolveOptions {
            skip_cached: true,
            upsize: None,
            download_timeout: Duration::from_secs(5),
            debug_images: false,
        }
    }

    fn item_view(html: &str) -> SnapshotView {
        let mut view = SnapshotView::new().with_page(ITEM, html);
        view.navigate(ITEM).expect("nav");
        view
    }

    fn quiet(_: &str, _: &str, _: serde_json::Value) -> Result<()> {
        Ok(())
    }

    #[test]
    fn position_number_reads_heading_or_title_without_heading() {
        let mut view = item_view(
            "<html><head><title>Charizard #4 | Shop</title></head><body><h1>Charizard  # 4</h1></body></html>",
        );
        assert_eq!(extract_position_number(&mut view, &SiteProfile::default()), "4");

        let mut view = item_view(
            "<html><head><title>Blastoise #2 Prices</title></head><body><h1>Blastoise</h1></body></html>",
        );
        assert_eq!(extract_position_number(&mut view, &SiteProfile::default()), "");

        let mut view = item_view(
            "<html><head><title>Venusaur #15 Prices</title></head><body><p>Venusaur</p></body></html>",
        );
        assert_eq!(extract_position_number(&mut view, &SiteProfile::default()), "15");

        let mut view = item_view("<html><body><div class='product-title'>Energy</div></body></html>");
        assert_eq!(extract_position_number(&mut view, &SiteProfile::default()), "");
    }

    #[test]
    fn cached_asset_short_circuits_without_fetches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("charizard-4");
        std::fs::write(base.with_extension("webp"), b"cached").expect("write");
        let lookup_id = LookupId::from_url(ITEM, "game");
        let mut view = item_view("<img id='product-image' src='https://cdn.test/c.jpg'>");
        let mut session = ScriptedSession::new();

        let outcome = resolve_and_fetch(
            &mut view,
            ResolveTarget {
                referer: ITEM,
                lookup_id: &lookup_id,
                destination_base: &base,
            },
            &mut session,
            &SiteProfile::default(),
            &options(),
            quiet,
        )
        .expect("resolve");

        assert!(session.requests.is_empty());
        let ResolveOutcome::Cached(asset) = outcome else {
            panic!("expected cache hit, got {outcome:?}");
        };
        assert_eq!(asset.extension, ".webp");
        assert_eq!(asset.bytes, 6);
        assert!(asset.source_url.is_empty());
        assert_eq!(asset.lookup_id.as_str(), "base-set/charizard-4");
    }

    #[test]
    fn resolves_best_candidate_with_upsize_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("charizard-4");
        let lookup_id = LookupId::from_url(ITEM, "game");
        let mut view = item_view(
            r#"<html><body>
                 <img id="product-image" src="https://cdn.test/card-240x240.jpg"
                      srcset="https://cdn.test/card.png?w=300 300w">
               </body></html>"#,
        );
        let mut session = ScriptedSession::new()
            .with_reply("https://cdn.test/card-240x240.jpg", ScriptedReply::Status(200, b"small".to_vec()));
        let mut events = Vec::new();
        let profile = SiteProfile {
            user_agent: "harvest-bot/2.0".to_string(),
            ..SiteProfile::default()
        };

        let outcome = resolve_and_fetch(
            &mut view,
            ResolveTarget {
                referer: ITEM,
                lookup_id: &lookup_id,
                destination_base: &base,
            },
            &mut session,
            &profile,
            &ResolveOptions {
                upsize: Some(UpsizeTarget::default()),
                ..options()
            },
            |_level: &str, event: &str, _data: serde_json::Value| {
                events.push(event.to_string());
                Ok(())
            },
        )
        .expect("resolve");

        assert_eq!(
            session.requested_urls(),
            vec![
                "https://cdn.test/card.png?w=1600",
                "https://cdn.test/card.jpg",
                "https://cdn.test/card.png?w=300",
                "https://cdn.test/card-240x240.jpg",
            ]
        );
        let asset = outcome.asset().expect("asset");
        assert_eq!(asset.source_url, "https://cdn.test/card-240x240.jpg");
        assert_eq!(asset.local_path, dir.path().join("charizard-4.jpg"));
        assert_eq!(events.iter().filter(|e| *e == "asset_attempt_failed").count(), 3);
        assert!(events.contains(&"asset_saved".to_string()));
        assert!(session.requests[0]
            .headers
            .contains(&("Referer", ITEM.to_string())));
        assert!(session
            .requests
            .iter()
            .all(|r| r.headers.contains(&("User-Agent", "harvest-bot/2.0".to_string()))));
    }

    #[test]
    fn page_without_images_reports_no_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lookup_id = LookupId::from_url(ITEM, "game");
        let mut view = item_view("<html><body><h1>Nothing here</h1></body></html>");
        let mut session = ScriptedSession::new();
        let outcome = resolve_and_fetch(
            &mut view,
            ResolveTarget {
                referer: ITEM,
                lookup_id: &lookup_id,
                destination_base: &dir.path().join("x"),
            },
            &mut session,
            &SiteProfile::default(),
            &options(),
            quiet,
        )
        .expect("resolve");
        assert_eq!(outcome, ResolveOutcome::NoCandidates);
        assert!(session.requests.is_empty());
    }
}
