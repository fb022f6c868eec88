use crate::paths::AppPaths;
use crate::{HarvestError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "en-GB,en";

/// Extensions a saved asset may carry; anything else falls back to the first entry.
pub const ALLOWED_IMAGE_EXTS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".avif"];
pub const FALLBACK_IMAGE_EXT: &str = ".jpg";

const MAX_MAX_ROUNDS: usize = 5_000;
const MAX_MAX_PAGES: usize = 1_000;

/// Per-run tunables. Stored as JSON under the config dir; CLI flags override fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarvestSettings {
    pub max_rounds: usize,
    pub stagnation_threshold: usize,
    pub target_count: Option<usize>,
    pub max_pages: usize,
    pub scroll_step_px: i64,
    pub page_down_every: usize,
    pub end_key_every: usize,
    pub skip_cached: bool,
    pub upsize: bool,
    pub upsize_width: u32,
    pub upsize_height: u32,
    pub require_position_number: bool,
    pub debug_images: bool,
    pub page_load_timeout_ms: u64,
    pub listing_wait_ms: u64,
    pub download_timeout_ms: u64,
    pub scroll_pause_ms: u64,
    pub scroll_jitter_ms: u64,
    pub page_pause_ms: u64,
    pub page_jitter_ms: u64,
    pub item_pause_ms: u64,
    pub item_jitter_ms: u64,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            max_rounds: 600,
            stagnation_threshold: 16,
            target_count: None,
            max_pages: 80,
            scroll_step_px: 800,
            page_down_every: 6,
            end_key_every: 20,
            skip_cached: false,
            upsize: false,
            upsize_width: 1600,
            upsize_height: 1600,
            require_position_number: false,
            debug_images: false,
            page_load_timeout_ms: 25_000,
            listing_wait_ms: 25_000,
            download_timeout_ms: 60_000,
            scroll_pause_ms: 900,
            scroll_jitter_ms: 700,
            page_pause_ms: 500,
            page_jitter_ms: 0,
            item_pause_ms: 400,
            item_jitter_ms: 400,
        }
    }
}

impl HarvestSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 || self.max_rounds > MAX_MAX_ROUNDS {
            return Err(HarvestError::SettingsInvalid(format!(
                "max_rounds must be within 1..={MAX_MAX_ROUNDS}, got {}",
                self.max_rounds
            )));
        }
        if self.stagnation_threshold == 0 {
            return Err(HarvestError::SettingsInvalid(
                "stagnation_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_pages > MAX_MAX_PAGES {
            return Err(HarvestError::SettingsInvalid(format!(
                "max_pages must be at most {MAX_MAX_PAGES}, got {}",
                self.max_pages
            )));
        }
        if self.target_count == Some(0) {
            return Err(HarvestError::SettingsInvalid(
                "target_count must be positive when set".to_string(),
            ));
        }
        if self.upsize_width == 0 || self.upsize_height == 0 {
            return Err(HarvestError::SettingsInvalid(
                "upsize dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn listing_wait(&self) -> Duration {
        Duration::from_millis(self.listing_wait_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }
}

/// Site constants shared by the harvester and resolver. Injected, never read as globals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiteProfile {
    /// First path segment of item-detail pages (`/{namespace}/{slug}/...`).
    pub namespace: String,
    pub sort_key: String,
    pub default_cookie_domain: String,
    pub user_agent: String,
    pub image_selectors: Vec<String>,
    pub image_attrs: Vec<String>,
    pub position_selectors: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            namespace: "game".to_string(),
            sort_key: "model-number".to_string(),
            default_cookie_domain: "www.pricecharting.com".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            image_selectors: [
                "img#product-image",
                "img.product-image",
                ".image-gallery img",
                ".gallery img",
                "img[alt^='Image:']",
                "img[src*='pricecharting']",
                "img[src*='cloudfront']",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            image_attrs: ["src", "data-src", "data-original", "data-lazy", "data-image"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            position_selectors: vec!["h1, .product-title".to_string()],
        }
    }
}

impl SiteProfile {
    /// CSS selector matching anchors under the namespace.
    pub fn anchor_selector(&self) -> String {
        format!("a[href^='/{}/'], a[href*='/{}/']", self.namespace, self.namespace)
    }
}

pub fn load_settings(paths: &AppPaths) -> Result<HarvestSettings> {
    let settings: HarvestSettings = load_json_or_default(&paths.settings_path(), "harvest settings")?;
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(paths: &AppPaths, settings: &HarvestSettings) -> Result<()> {
    settings.validate()?;
    save_json(&paths.settings_path(), settings)
}

pub fn load_site_profile(paths: &AppPaths) -> Result<SiteProfile> {
    let profile: SiteProfile = load_json_or_default(&paths.site_profile_path(), "site profile")?;
    if profile.namespace.trim().is_empty() || profile.namespace.contains('/') {
        return Err(HarvestError::SettingsInvalid(format!(
            "site profile namespace must be a single path segment, got {:?}",
            profile.namespace
        )));
    }
    Ok(profile)
}

fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        HarvestError::SettingsInvalid(format!(
            "failed to parse {what} at {}: {e}",
            path.to_string_lossy()
        ))
    })
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = load_settings(&paths).expect("settings");
        assert_eq!(settings, HarvestSettings::default());
        assert_eq!(settings.stagnation_threshold, 16);
        assert_eq!(settings.max_pages, 80);
    }

    #[test]
    fn partial_settings_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(
            paths.settings_path(),
            r#"{"max_rounds": 40, "upsize": true, "target_count": 120}"#,
        )
        .expect("write");

        let settings = load_settings(&paths).expect("settings");
        assert_eq!(settings.max_rounds, 40);
        assert!(settings.upsize);
        assert_eq!(settings.target_count, Some(120));
        assert_eq!(settings.stagnation_threshold, 16);
    }

    #[test]
    fn save_then_load_preserves_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = HarvestSettings {
            skip_cached: true,
            max_pages: 12,
            ..HarvestSettings::default()
        };
        save_settings(&paths, &settings).expect("save");
        assert_eq!(load_settings(&paths).expect("load"), settings);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = HarvestSettings {
            stagnation_threshold: 0,
            ..HarvestSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(HarvestError::SettingsInvalid(_))
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.settings_path(), "{not json").expect("write");
        assert!(load_settings(&paths).is_err());
    }

    #[test]
    fn site_profile_rejects_multi_segment_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.site_profile_path(), r#"{"namespace": "a/b"}"#).expect("write");
        assert!(load_site_profile(&paths).is_err());
    }
}
