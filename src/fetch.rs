use crate::config::{ACCEPT_LANGUAGE, ALLOWED_IMAGE_EXTS, FALLBACK_IMAGE_EXT, IMAGE_ACCEPT};
use crate::session::{FetchRequest, HttpSession};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedAsset {
    pub url: String,
    pub path: PathBuf,
    pub extension: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchAttempt {
    Saved(SavedAsset),
    Failed { url: String, reason: String },
}

/// Every attempt made, in order; at most the last one is `Saved`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackReport {
    pub attempts: Vec<FetchAttempt>,
}

impl FallbackReport {
    pub fn saved(&self) -> Option<&SavedAsset> {
        match self.attempts.last() {
            Some(FetchAttempt::Saved(asset)) => Some(asset),
            _ => None,
        }
    }

    pub fn into_saved(self) -> Option<SavedAsset> {
        match self.attempts.into_iter().last() {
            Some(FetchAttempt::Saved(asset)) => Some(asset),
            _ => None,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a, FetchAttempt::Failed { .. }))
            .count()
    }
}

/// Extension from the URL path when allow-listed, otherwise `.jpg`.
pub fn extension_for_url(url: &str) -> &'static str {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_IMAGE_EXT;
    };
    let path = parsed.path().to_ascii_lowercase();
    ALLOWED_IMAGE_EXTS
        .iter()
        .copied()
        .find(|ext| path.ends_with(ext))
        .unwrap_or(FALLBACK_IMAGE_EXT)
}

/// `base` with `suffix` appended to its final component (`a/b` + `.jpg` → `a/b.jpg`).
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = base.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// A previously saved, non-empty asset for `destination_base` under any allowed extension.
pub fn find_existing_asset(destination_base: &Path) -> Option<PathBuf> {
    ALLOWED_IMAGE_EXTS.iter().find_map(|ext| {
        let candidate = with_suffix(destination_base, ext);
        match std::fs::metadata(&candidate) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(candidate),
            _ => None,
        }
    })
}

/// Per-item request context shared by every candidate download.
#[derive(Debug, Clone, Copy)]
pub struct ImageFetch<'a> {
    pub referer: &'a str,
    pub user_agent: &'a str,
    pub timeout: Duration,
}

pub fn image_request(url: &str, fetch: &ImageFetch<'_>) -> FetchRequest {
    FetchRequest {
        url: url.to_string(),
        headers: vec![
            ("User-Agent", fetch.user_agent.to_string()),
            ("Referer", fetch.referer.to_string()),
            ("Accept", IMAGE_ACCEPT.to_string()),
            ("Accept-Language", ACCEPT_LANGUAGE.to_string()),
        ],
        timeout: fetch.timeout,
    }
}

/// One GET. Transport errors, non-2xx statuses, empty bodies, and write
/// failures all come back as `Failed`; the partial file never survives.
pub fn try_download<S>(
    session: &mut S,
    url: &str,
    fetch: &ImageFetch<'_>,
    destination_base: &Path,
) -> FetchAttempt
where
    S: HttpSession + ?Sized,
{
    let failed = |reason: String| FetchAttempt::Failed {
        url: url.to_string(),
        reason,
    };

    let response = match session.get(&image_request(url, fetch)) {
        Ok(response) => response,
        Err(e) => return failed(e.to_string()),
    };
    if !response.is_success() {
        return failed(format!("status {}", response.status));
    }

    let extension = extension_for_url(url);
    let dst = with_suffix(destination_base, extension);
    let tmp = with_suffix(destination_base, &format!("{extension}.part"));
    match stream_to_file(response.body, &tmp) {
        Ok((0, _)) => {
            let _ = std::fs::remove_file(&tmp);
            failed("empty body".to_string())
        }
        Ok((bytes, sha256)) => {
            if let Err(e) = std::fs::rename(&tmp, &dst) {
                let _ = std::fs::remove_file(&tmp);
                return failed(format!("rename into place failed: {e}"));
            }
            FetchAttempt::Saved(SavedAsset {
                url: url.to_string(),
                path: dst,
                extension: extension.to_string(),
                bytes,
                sha256,
            })
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            failed(format!("write failed: {e}"))
        }
    }
}

fn stream_to_file(mut reader: Box<dyn Read>, path: &Path) -> std::io::Result<(u64, String)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    let digest = copy_and_hash(&mut reader, &mut file)?;
    file.flush()?;
    Ok(digest)
}

/// Copy `reader` into `writer`, returning the byte count and hex SHA-256.
pub(crate) fn copy_and_hash<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<(u64, String)>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut total = 0_u64;
    let mut buf = [0u8; 1024 * 64];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

/// Try `candidates` strictly in order and stop at the first saved asset.
/// `on_attempt` sees each attempt as it completes.
pub fn download_first_ok<S, F>(
    session: &mut S,
    candidates: &[String],
    fetch: &ImageFetch<'_>,
    destination_base: &Path,
    mut on_attempt: F,
) -> FallbackReport
where
    S: HttpSession + ?Sized,
    F: FnMut(&FetchAttempt),
{
    let mut report = FallbackReport::default();
    for url in candidates {
        let attempt = try_download(session, url, fetch, destination_base);
        on_attempt(&attempt);
        let done = matches!(attempt, FetchAttempt::Saved(_));
        report.attempts.push(attempt);
        if done {
            break;
        }
    }
    report
}
