use std::path::PathBuf;
use std::str::FromStr;

use catalog_harvest::catalog::{parse_id_list, read_catalog_config, RowFilter};
use catalog_harvest::config::{load_settings, load_site_profile};
use catalog_harvest::logs::RunLog;
use catalog_harvest::pacing::JitterPacer;
use catalog_harvest::paths::{display, AppPaths};
use catalog_harvest::render::ConsoleGate;
use catalog_harvest::runner::{run_catalogs, RunContext};
use catalog_harvest::session::UreqSession;
use catalog_harvest::static_view::StaticPageView;

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut config: Option<PathBuf> = None;
    let mut base_dir: Option<PathBuf> = None;
    let mut cache_dir: Option<PathBuf> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut filter = RowFilter::default();
    let mut hires_tweak = false;
    let mut target_count: Option<usize> = None;
    let mut max_rounds: Option<usize> = None;
    let mut stagnant_limit: Option<usize> = None;
    let mut max_pages: Option<usize> = None;
    let mut strict_set_number = false;
    let mut only_missing_images = false;
    let mut debug_images = false;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => config = Some(PathBuf::from(value(&args, &mut i, "--config")?)),
            "--base-dir" => base_dir = Some(PathBuf::from(value(&args, &mut i, "--base-dir")?)),
            "--cache" => cache_dir = Some(PathBuf::from(value(&args, &mut i, "--cache")?)),
            "--out" => out_dir = Some(PathBuf::from(value(&args, &mut i, "--out")?)),
            "--only-id" => filter.only_id = Some(number(&args, &mut i, "--only-id")?),
            "--only-ids" => {
                let raw = value(&args, &mut i, "--only-ids")?;
                filter.only_ids = Some(
                    parse_id_list(raw)
                        .ok_or_else(|| format!("--only-ids has no numeric ids: {raw:?}"))?,
                );
            }
            "--only-name" => {
                filter.only_name = Some(value(&args, &mut i, "--only-name")?.to_string())
            }
            "--hires-tweak" => hires_tweak = true,
            "--target-count" => target_count = Some(number(&args, &mut i, "--target-count")?),
            "--max-rounds" => max_rounds = Some(number(&args, &mut i, "--max-rounds")?),
            "--stagnant-limit" => stagnant_limit = Some(number(&args, &mut i, "--stagnant-limit")?),
            "--max-pages" => max_pages = Some(number(&args, &mut i, "--max-pages")?),
            "--strict-set-number" => strict_set_number = true,
            "--only-missing-images" => only_missing_images = true,
            "--debug-images" => debug_images = true,
            "--quiet" => quiet = true,
            other => return Err(format!("unknown arg: {other} (try --help)")),
        }
        i += 1;
    }

    let config = config.ok_or_else(|| "--config is required (try --help)".to_string())?;
    let base_dir = base_dir
        .or_else(default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;

    let mut paths = AppPaths::new(base_dir);
    if let Some(dir) = cache_dir {
        paths = paths.with_cache_dir(dir);
    }
    if let Some(dir) = out_dir {
        paths = paths.with_out_dir(dir);
    }
    paths.ensure_dirs().map_err(|e| e.to_string())?;

    let mut settings = load_settings(&paths).map_err(|e| e.to_string())?;
    if target_count.is_some() {
        settings.target_count = target_count;
    }
    if let Some(v) = max_rounds {
        settings.max_rounds = v;
    }
    if let Some(v) = stagnant_limit {
        settings.stagnation_threshold = v;
    }
    if let Some(v) = max_pages {
        settings.max_pages = v;
    }
    settings.upsize |= hires_tweak;
    settings.require_position_number |= strict_set_number;
    settings.skip_cached |= only_missing_images;
    settings.debug_images |= debug_images;
    settings.validate().map_err(|e| e.to_string())?;
    let profile = load_site_profile(&paths).map_err(|e| e.to_string())?;

    let rows = read_catalog_config(&config).map_err(|e| e.to_string())?;
    let rows: Vec<_> = rows.into_iter().filter(|r| filter.accepts(r)).collect();
    if rows.is_empty() {
        println!("[info] No config rows matched filters. {}", filter.describe());
        return Ok(());
    }
    let mut targets = Vec::with_capacity(rows.len());
    for row in &rows {
        let target = row
            .to_target()
            .map_err(|e| format!("config row {:?} ({}): {e}", row.id_raw, row.name))?;
        targets.push(target);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let log = RunLog::new(&paths, &run_id).echo_to_stderr(!quiet);
    println!("Run: {run_id}");
    println!("Log: {}", display(log.path()));
    println!("Cache: {}", display(&paths.cache_dir()));
    println!("Out: {}", display(&paths.out_dir()));

    let ctx = RunContext {
        run_id: &run_id,
        paths: &paths,
        settings: &settings,
        profile: &profile,
    };
    let mut view = StaticPageView::new(settings.page_load_timeout(), &profile.user_agent);
    let mut session = UreqSession::new(&profile.user_agent);
    let mut pacer = JitterPacer::from_settings(&settings);
    let mut gate = ConsoleGate;

    let summary = run_catalogs(
        ctx,
        &mut view,
        &mut session,
        &mut pacer,
        &mut gate,
        &targets,
        |level: &str, event: &str, data: serde_json::Value| log.log_line(level, event, data),
    )
    .map_err(|e| e.to_string())?;

    for manifest in &summary.catalogs {
        println!(
            "{}: {} rows ({} downloaded, {} cached, {} without image)",
            manifest.name,
            manifest.records_written,
            manifest.items.downloaded,
            manifest.items.cached,
            manifest.items.without_asset
        );
    }
    for (name, error) in &summary.failed {
        eprintln!("{name}: FAILED ({error})");
    }
    Ok(())
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn number<T: FromStr>(args: &[String], i: &mut usize, flag: &str) -> Result<T, String> {
    let raw = value(args, i, flag)?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("{flag} expects a number, got {raw:?}"))
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("CATALOG_HARVEST_BASE_DIR") {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }
    std::env::current_dir().ok()
}

fn print_help() {
    println!(
        r#"catalog_harvest

Collects item links from catalog pages, downloads one image per item into the
cache, and writes one CSV of records per catalog.

Usage:
  cargo run --bin catalog_harvest -- --config sets.csv
  cargo run --bin catalog_harvest -- --config sets.csv --only-ids "3,7 12" --hires-tweak

Options:
  --config <path>         Catalog config CSV (columns id, Name, link; delimiter auto-detected)
  --base-dir <path>       Base dir for config/, cache/, out/, logs/ (default: $CATALOG_HARVEST_BASE_DIR or cwd)
  --cache <path>          Image cache dir (default: <base-dir>/cache)
  --out <path>            CSV output dir (default: <base-dir>/out)
  --only-id <n>           Process only the row with this id
  --only-ids <list>       Comma/space separated ids, e.g. "3,7 12"
  --only-name <text>      Case-insensitive substring match on the name
  --hires-tweak           Try larger variants of each image URL first
  --target-count <n>      Stop collecting links once this many are found
  --max-rounds <n>        Max scroll rounds (default 600)
  --stagnant-limit <n>    Stop after this many rounds with no new links (default 16)
  --max-pages <n>         Pagination fallback upper bound (default 80)
  --strict-set-number     Skip items without a '#<num>' set number
  --only-missing-images   Skip items whose image is already cached
  --debug-images          Log full candidate URLs
  --quiet                 Do not echo log events to stderr
"#
    );
}
