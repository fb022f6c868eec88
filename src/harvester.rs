//! Item-link discovery on a dynamically loading catalog page.
//!
//! Two producers feed one dedup set: incremental scrolling, which stops on
//! stagnation, and a `?sort=..&page=N` pagination sweep used when scrolling
//! under-collects.

use crate::catalog::CatalogTarget;
use crate::config::{HarvestSettings, SiteProfile};
use crate::links::ItemLink;
use crate::logs::redact_url_for_log;
use crate::pacing::{PauseKind, Pacer};
use crate::render::{Key, RenderView, WaitOutcome};
use crate::{HarvestError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

/// Consecutive pagination pages without new links before the sweep ends.
const PAGINATION_STAGNANT_PAGES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestLimits {
    pub max_rounds: usize,
    pub stagnation_threshold: usize,
    pub target_count: Option<usize>,
    pub max_pages: usize,
    pub scroll_step_px: i64,
    pub page_down_every: usize,
    pub end_key_every: usize,
    pub page_load_timeout: Duration,
}

impl HarvestLimits {
    pub fn from_settings(settings: &HarvestSettings) -> Self {
        Self {
            max_rounds: settings.max_rounds,
            stagnation_threshold: settings.stagnation_threshold,
            target_count: settings.target_count,
            max_pages: settings.max_pages,
            scroll_step_px: settings.scroll_step_px,
            page_down_every: settings.page_down_every,
            end_key_every: settings.end_key_every,
            page_load_timeout: settings.page_load_timeout(),
        }
    }

    fn target_reached(&self, count: usize) -> bool {
        matches!(self.target_count, Some(target) if count >= target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollStop {
    TargetReached,
    Stagnated,
    RoundsExhausted,
    ViewFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestOutcome {
    /// Sorted by canonical URL.
    pub links: Vec<ItemLink>,
    pub scroll_rounds: usize,
    pub scroll_stop: ScrollStop,
    pub found_by_scroll: usize,
    pub pagination_pages: usize,
    pub added_by_pagination: usize,
}

pub fn harvest<V, P, FLog>(
    view: &mut V,
    target: &CatalogTarget,
    profile: &SiteProfile,
    limits: &HarvestLimits,
    pacer: &mut P,
    mut log_line: FLog,
) -> Result<HarvestOutcome>
where
    V: RenderView + ?Sized,
    P: Pacer + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let mut seen: BTreeSet<ItemLink> = BTreeSet::new();

    let mut scroll_rounds = 0_usize;
    let scroll_stop =
        match scroll_phase(view, target, profile, limits, pacer, &mut seen, &mut scroll_rounds) {
            Ok(stop) => stop,
            Err(err) => {
                log_line(
                    "warn",
                    "harvest_scroll_failed",
                    serde_json::json!({
                        "slug": target.slug,
                        "rounds": scroll_rounds,
                        "found": seen.len(),
                        "error": err.to_string(),
                    }),
                )?;
                ScrollStop::ViewFailed
            }
        };
    let found_by_scroll = seen.len();
    log_line(
        "info",
        "harvest_scroll_done",
        serde_json::json!({
            "slug": target.slug,
            "rounds": scroll_rounds,
            "stop": scroll_stop,
            "found": found_by_scroll,
        }),
    )?;

    let mut pagination_pages = 0;
    if !limits.target_reached(seen.len()) && limits.max_pages > 0 {
        pagination_pages =
            pagination_phase(view, target, profile, limits, pacer, &mut seen, &mut log_line)?;
        log_line(
            "info",
            "harvest_pagination_done",
            serde_json::json!({
                "slug": target.slug,
                "pages": pagination_pages,
                "added": seen.len() - found_by_scroll,
                "total": seen.len(),
            }),
        )?;
    }

    let added_by_pagination = seen.len() - found_by_scroll;
    Ok(HarvestOutcome {
        links: seen.into_iter().collect(),
        scroll_rounds,
        scroll_stop,
        found_by_scroll,
        pagination_pages,
        added_by_pagination,
    })
}

/// Scan, scroll, pause; stop on target, round budget, or `stagnation_threshold`
/// consecutive rounds without growth. `rounds` counts started rounds, so it
/// stays accurate when the view fails part-way.
fn scroll_phase<V, P>(
    view: &mut V,
    target: &CatalogTarget,
    profile: &SiteProfile,
    limits: &HarvestLimits,
    pacer: &mut P,
    seen: &mut BTreeSet<ItemLink>,
    rounds: &mut usize,
) -> Result<ScrollStop>
where
    V: RenderView + ?Sized,
    P: Pacer + ?Sized,
{
    let mut tracker = StagnationTracker::new(limits.stagnation_threshold);

    for round in 0..limits.max_rounds {
        *rounds = round + 1;
        scan_anchors(view, target, profile, seen)?;
        if limits.target_reached(seen.len()) {
            return Ok(ScrollStop::TargetReached);
        }

        view.scroll_by(limits.scroll_step_px)?;
        if limits.page_down_every > 0 && round % limits.page_down_every == 0 {
            view.send_key(Key::PageDown)?;
        }
        if limits.end_key_every > 0 && round % limits.end_key_every == 0 {
            view.send_key(Key::End)?;
        }
        pacer.pause(PauseKind::ScrollRound);

        if tracker.observe(seen.len()) {
            return Ok(ScrollStop::Stagnated);
        }
    }
    Ok(ScrollStop::RoundsExhausted)
}

fn pagination_phase<V, P, FLog>(
    view: &mut V,
    target: &CatalogTarget,
    profile: &SiteProfile,
    limits: &HarvestLimits,
    pacer: &mut P,
    seen: &mut BTreeSet<ItemLink>,
    log_line: &mut FLog,
) -> Result<usize>
where
    V: RenderView + ?Sized,
    P: Pacer + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let anchor_selector = profile.anchor_selector();
    let mut paged: BTreeSet<ItemLink> = BTreeSet::new();
    let mut stagnant = 0_usize;
    let mut pages = 0_usize;

    for page in 1..=limits.max_pages {
        let url = pagination_url(&target.base_url, &profile.sort_key, page);
        let loaded = view
            .navigate(&url)
            .and_then(|()| view.wait_for(&anchor_selector, limits.page_load_timeout));
        match loaded {
            Ok(WaitOutcome::Satisfied) => {}
            Ok(WaitOutcome::TimedOut) => {
                log_line(
                    "info",
                    "harvest_page_timeout",
                    serde_json::json!({ "page": page }),
                )?;
                break;
            }
            Err(err) => {
                page_unavailable(log_line, page, &url, &err)?;
                break;
            }
        }
        pages += 1;

        let before = paged.len();
        let scanned = scan_anchors(view, target, profile, &mut paged);
        seen.extend(paged.iter().cloned());
        if let Err(err) = scanned {
            page_unavailable(log_line, page, &url, &err)?;
            break;
        }

        if limits.target_reached(seen.len()) {
            break;
        }
        if paged.len() == before {
            stagnant += 1;
        } else {
            stagnant = 0;
        }
        if stagnant >= PAGINATION_STAGNANT_PAGES {
            break;
        }
        pacer.pause(PauseKind::CatalogPage);
    }
    Ok(pages)
}

/// Render failures end the sweep; links already collected are kept.
fn page_unavailable<FLog>(log_line: &mut FLog, page: usize, url: &str, err: &HarvestError) -> Result<()>
where
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    log_line(
        "warn",
        "harvest_page_unavailable",
        serde_json::json!({
            "page": page,
            "url": redact_url_for_log(url),
            "error": err.to_string(),
        }),
    )
}

/// Insert every rendered anchor under `/{namespace}/{slug}/` into `seen`; returns how many were new.
pub fn scan_anchors<V>(
    view: &mut V,
    target: &CatalogTarget,
    profile: &SiteProfile,
    seen: &mut BTreeSet<ItemLink>,
) -> Result<usize>
where
    V: RenderView + ?Sized,
{
    let base = view
        .current_url()
        .ok()
        .and_then(|u| Url::parse(&u).ok())
        .unwrap_or_else(|| target.base_url.clone());
    let before = seen.len();
    for anchor in view.query("a[href]")? {
        let Some(href) = view.attribute(anchor, "href")? else {
            continue;
        };
        if let Some(link) = ItemLink::from_href(&href, &base, &profile.namespace, &target.slug) {
            seen.insert(link);
        }
    }
    Ok(seen.len() - before)
}

pub fn pagination_url(base_url: &Url, sort_key: &str, page: usize) -> String {
    let mut base = base_url.clone();
    base.set_query(None);
    base.set_fragment(None);
    format!("{base}?sort={sort_key}&page={page}")
}

/// Counts consecutive non-growing observations; resets on any growth.
#[derive(Debug, Clone)]
pub struct StagnationTracker {
    threshold: usize,
    last: Option<usize>,
    stagnant: usize,
}

impl StagnationTracker {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            last: None,
            stagnant: 0,
        }
    }

    /// Returns `true` once the threshold is hit.
    pub fn observe(&mut self, count: usize) -> bool {
        if self.last == Some(count) {
            self.stagnant += 1;
        } else {
            self.stagnant = 0;
        }
        self.last = Some(count);
        self.stagnant >= self.threshold
    }

    pub fn stagnant_rounds(&self) -> usize {
        self.stagnant
    }
}
