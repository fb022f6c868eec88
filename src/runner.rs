//! Catalog orchestration: open the listing, harvest links, visit each item,
//! resolve its asset, then write the record CSV and the run manifest.

use crate::catalog::CatalogTarget;
use crate::config::{HarvestSettings, SiteProfile};
use crate::harvester::{harvest, HarvestLimits, HarvestOutcome};
use crate::links::ItemLink;
use crate::logs::{now_ms, redact_url_for_log};
use crate::pacing::{PauseKind, Pacer};
use crate::paths::AppPaths;
use crate::records::{write_manifest, write_records_csv, CatalogManifest, ItemCounts, ItemFailure, ItemRecord};
use crate::render::{wait_for_listing, ListingState, RenderView, VerificationGate, WaitOutcome};
use crate::resolver::{cached_asset, extract_position_number, resolve_and_fetch, ResolveOptions, ResolveOutcome, ResolveTarget};
use crate::session::HttpSession;
use crate::Result;

/// Anything that shows the detail page has rendered enough to resolve.
const ITEM_READY_SELECTOR: &str = "img, picture source[srcset], meta[property='og:image'], \
     meta[name='og:image'], meta[name='twitter:image'], h1, .product-title, title";

#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub paths: &'a AppPaths,
    pub settings: &'a HarvestSettings,
    pub profile: &'a SiteProfile,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub catalogs: Vec<CatalogManifest>,
    /// `(catalog name, error)` for catalogs that ended early.
    pub failed: Vec<(String, String)>,
}

/// Run every target in order. A failing catalog is logged and the run moves on.
pub fn run_catalogs<V, S, P, G, FLog>(
    ctx: RunContext<'_>,
    view: &mut V,
    session: &mut S,
    pacer: &mut P,
    gate: &mut G,
    targets: &[CatalogTarget],
    mut log_line: FLog,
) -> Result<RunSummary>
where
    V: RenderView + ?Sized,
    S: HttpSession + ?Sized,
    P: Pacer + ?Sized,
    G: VerificationGate + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let mut summary = RunSummary::default();
    for target in targets {
        match run_catalog(ctx, view, session, pacer, gate, target, &mut log_line) {
            Ok(manifest) => summary.catalogs.push(manifest),
            Err(err) => {
                log_line(
                    "error",
                    "catalog_failed",
                    serde_json::json!({
                        "name": target.name,
                        "slug": target.slug,
                        "error": err.to_string(),
                    }),
                )?;
                summary.failed.push((target.name.clone(), err.to_string()));
            }
        }
    }
    Ok(summary)
}

pub fn run_catalog<V, S, P, G, FLog>(
    ctx: RunContext<'_>,
    view: &mut V,
    session: &mut S,
    pacer: &mut P,
    gate: &mut G,
    target: &CatalogTarget,
    mut log_line: FLog,
) -> Result<CatalogManifest>
where
    V: RenderView + ?Sized,
    S: HttpSession + ?Sized,
    P: Pacer + ?Sized,
    G: VerificationGate + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    let started_at_ms = now_ms();
    let catalog_url = target.sorted_url(&ctx.profile.sort_key);
    log_line(
        "info",
        "catalog_start",
        serde_json::json!({
            "config_id": target.config_id,
            "name": target.name,
            "slug": target.slug,
            "url": redact_url_for_log(&catalog_url),
        }),
    )?;

    let listing = match open_listing(ctx, view, gate, &catalog_url, &mut log_line)? {
        Some(listing) => listing,
        None => {
            let manifest = empty_manifest(ctx, target, &catalog_url, started_at_ms, "aborted");
            write_manifest(&ctx.paths.manifests_dir(), &manifest)?;
            return Ok(manifest);
        }
    };

    let limits = HarvestLimits::from_settings(ctx.settings);
    let outcome = harvest(view, target, ctx.profile, &limits, pacer, &mut log_line)?;
    log_line(
        "info",
        "catalog_links",
        serde_json::json!({
            "slug": target.slug,
            "links": outcome.links.len(),
            "found_by_scroll": outcome.found_by_scroll,
            "added_by_pagination": outcome.added_by_pagination,
        }),
    )?;

    let options = ResolveOptions::from_settings(ctx.settings);
    let mut records: Vec<ItemRecord> = Vec::new();
    let mut counts = ItemCounts {
        total: outcome.links.len(),
        ..ItemCounts::default()
    };
    let mut failures = Vec::new();

    for link in &outcome.links {
        let lookup_id = link.lookup_id(&ctx.profile.namespace);
        let destination_base = ctx.paths.asset_base(lookup_id.as_str());
        let next_index = records.len() + 1;

        if ctx.settings.skip_cached {
            if let Some(asset) = cached_asset(&lookup_id, &destination_base)? {
                log_line(
                    "info",
                    "item_cached",
                    serde_json::json!({
                        "lookup_id": lookup_id,
                        "path": asset.local_path,
                    }),
                )?;
                counts.cached += 1;
                records.push(
                    ItemRecord::new(next_index, lookup_id, String::new())
                        .with_asset(Some(asset.local_path)),
                );
                continue;
            }
        }

        if let Err(err) = open_item(ctx, view, link, &mut log_line) {
            log_line(
                "warn",
                "item_failed",
                serde_json::json!({
                    "lookup_id": lookup_id,
                    "url": redact_url_for_log(link.as_str()),
                    "error": err.to_string(),
                }),
            )?;
            counts.failed += 1;
            failures.push(ItemFailure {
                link: link.to_string(),
                error: err.to_string(),
            });
            if !ctx.settings.require_position_number {
                records.push(ItemRecord::new(next_index, lookup_id, String::new()));
            }
            pacer.pause(PauseKind::Item);
            continue;
        }

        let position_number = extract_position_number(view, ctx.profile);
        if ctx.settings.require_position_number && position_number.is_empty() {
            log_line(
                "info",
                "item_skipped_no_number",
                serde_json::json!({ "lookup_id": lookup_id }),
            )?;
            counts.skipped_no_number += 1;
            continue;
        }

        let resolved = resolve_and_fetch(
            view,
            ResolveTarget {
                referer: link.as_str(),
                lookup_id: &lookup_id,
                destination_base: &destination_base,
            },
            session,
            ctx.profile,
            &options,
            &mut log_line,
        )?;
        let asset_path = resolved.asset().map(|asset| asset.local_path.clone());
        match resolved {
            ResolveOutcome::Downloaded(_) => counts.downloaded += 1,
            ResolveOutcome::Cached(_) => counts.cached += 1,
            ResolveOutcome::NoCandidates | ResolveOutcome::Exhausted { .. } => {
                counts.without_asset += 1
            }
        }
        records.push(ItemRecord::new(next_index, lookup_id, position_number).with_asset(asset_path));
        pacer.pause(PauseKind::Item);
    }

    let csv_path = ctx.paths.out_dir().join(target.output_file_name());
    write_records_csv(&csv_path, &records)?;
    log_line(
        "info",
        "catalog_written",
        serde_json::json!({
            "slug": target.slug,
            "path": csv_path,
            "rows": records.len(),
        }),
    )?;

    let manifest = CatalogManifest {
        records_written: records.len(),
        csv_path: Some(csv_path),
        items: counts,
        failures,
        ..harvested_manifest(ctx, target, &catalog_url, started_at_ms, listing, &outcome)
    };
    let manifest_path = write_manifest(&ctx.paths.manifests_dir(), &manifest)?;
    log_line(
        "info",
        "catalog_done",
        serde_json::json!({
            "slug": target.slug,
            "items": manifest.items,
            "manifest": manifest_path,
        }),
    )?;
    Ok(manifest)
}

/// Navigate to the listing and get past any human check. `None` means the
/// operator chose to skip this catalog.
fn open_listing<V, G, FLog>(
    ctx: RunContext<'_>,
    view: &mut V,
    gate: &mut G,
    catalog_url: &str,
    log_line: &mut FLog,
) -> Result<Option<&'static str>>
where
    V: RenderView + ?Sized,
    G: VerificationGate + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    if let Err(err) = view.navigate(catalog_url) {
        log_line(
            "warn",
            "catalog_navigation_failed",
            serde_json::json!({
                "url": redact_url_for_log(catalog_url),
                "error": err.to_string(),
            }),
        )?;
        return Ok(Some("timed_out"));
    }

    let anchor_selector = ctx.profile.anchor_selector();
    match wait_for_listing(view, &anchor_selector, ctx.settings.listing_wait())? {
        ListingState::Ready => Ok(Some("ready")),
        ListingState::TimedOut => {
            log_line(
                "warn",
                "catalog_listing_timeout",
                serde_json::json!({ "url": redact_url_for_log(catalog_url) }),
            )?;
            Ok(Some("timed_out"))
        }
        ListingState::VerificationRequired => {
            log_line(
                "warn",
                "catalog_verification_required",
                serde_json::json!({ "url": redact_url_for_log(catalog_url) }),
            )?;
            if !gate.await_resolution(catalog_url)? {
                log_line(
                    "info",
                    "catalog_verification_skipped",
                    serde_json::json!({ "url": redact_url_for_log(catalog_url) }),
                )?;
                return Ok(None);
            }
            let after = wait_for_listing(view, &anchor_selector, ctx.settings.listing_wait())?;
            log_line(
                "info",
                "catalog_verification_resolved",
                serde_json::json!({ "listing_ready": after == ListingState::Ready }),
            )?;
            Ok(Some("verified"))
        }
    }
}

/// Navigate to a detail page and wait for it to render; a wait timeout is logged, not fatal.
fn open_item<V, FLog>(
    ctx: RunContext<'_>,
    view: &mut V,
    link: &ItemLink,
    log_line: &mut FLog,
) -> Result<()>
where
    V: RenderView + ?Sized,
    FLog: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    view.navigate(link.as_str())?;
    if view.wait_for(ITEM_READY_SELECTOR, ctx.settings.page_load_timeout())? == WaitOutcome::TimedOut {
        log_line(
            "info",
            "item_wait_timeout",
            serde_json::json!({ "url": redact_url_for_log(link.as_str()) }),
        )?;
    }
    Ok(())
}

fn empty_manifest(
    ctx: RunContext<'_>,
    target: &CatalogTarget,
    catalog_url: &str,
    started_at_ms: i64,
    listing: &str,
) -> CatalogManifest {
    CatalogManifest {
        run_id: ctx.run_id.to_string(),
        config_id: target.config_id,
        name: target.name.clone(),
        catalog_url: catalog_url.to_string(),
        slug: target.slug.clone(),
        started_at_ms,
        finished_at_ms: now_ms(),
        listing: listing.to_string(),
        links_found: 0,
        found_by_scroll: 0,
        added_by_pagination: 0,
        scroll_rounds: 0,
        pagination_pages: 0,
        items: ItemCounts::default(),
        records_written: 0,
        csv_path: None,
        failures: Vec::new(),
    }
}

fn harvested_manifest(
    ctx: RunContext<'_>,
    target: &CatalogTarget,
    catalog_url: &str,
    started_at_ms: i64,
    listing: &str,
    outcome: &HarvestOutcome,
) -> CatalogManifest {
    CatalogManifest {
        links_found: outcome.links.len(),
        found_by_scroll: outcome.found_by_scroll,
        added_by_pagination: outcome.added_by_pagination,
        scroll_rounds: outcome.scroll_rounds,
        pagination_pages: outcome.pagination_pages,
        ..empty_manifest(ctx, target, catalog_url, started_at_ms, listing)
    }
}
