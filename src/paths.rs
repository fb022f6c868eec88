use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
    cache_override: Option<PathBuf>,
    out_override: Option<PathBuf>,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            cache_override: None,
            out_override: None,
        }
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_override = Some(dir);
        self
    }

    pub fn with_out_dir(mut self, dir: PathBuf) -> Self {
        self.out_override = Some(dir);
        self
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir().join("harvest_settings.json")
    }

    pub fn site_profile_path(&self) -> PathBuf {
        self.config_dir().join("site_profile.json")
    }

    /// Downloaded assets, keyed by lookup id.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_override
            .clone()
            .unwrap_or_else(|| self.base_dir.join("cache"))
    }

    pub fn out_dir(&self) -> PathBuf {
        self.out_override
            .clone()
            .unwrap_or_else(|| self.base_dir.join("out"))
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.out_dir().join("manifests")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{run_id}.jsonl"))
    }

    /// Destination path without extension for one item's asset.
    pub fn asset_base(&self, lookup_id: &str) -> PathBuf {
        let mut path = self.cache_dir();
        for segment in lookup_id.split('/') {
            let segment = sanitize_path_segment(segment);
            if !segment.is_empty() {
                path.push(segment);
            }
        }
        path
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.config_dir(),
            self.cache_dir(),
            self.out_dir(),
            self.manifests_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn sanitize_path_segment(segment: &str) -> String {
    let trimmed = segment.trim();
    if trimmed == "." || trimmed == ".." {
        return String::new();
    }
    trimmed
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

pub fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_base_keeps_lookup_id_segments() {
        let paths = AppPaths::new(PathBuf::from("/data"));
        let base = paths.asset_base("set-name/card's-name-12");
        assert_eq!(
            base,
            PathBuf::from("/data")
                .join("cache")
                .join("set-name")
                .join("card's-name-12")
        );
    }

    #[test]
    fn asset_base_drops_traversal_segments() {
        let paths = AppPaths::new(PathBuf::from("/data")).with_cache_dir(PathBuf::from("/c"));
        let base = paths.asset_base("../set/..//x?y");
        assert_eq!(base, PathBuf::from("/c").join("set").join("x_y"));
    }

    #[test]
    fn ensure_dirs_creates_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("dirs");
        assert!(paths.config_dir().is_dir());
        assert!(paths.cache_dir().is_dir());
        assert!(paths.manifests_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
    }
}
