use crate::paths::AppPaths;
use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

const RUN_LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const RUN_LOG_MAX_BACKUPS: usize = 3;

/// JSON-lines event log for one run: `{ts_ms, run_id, level, event, data}` per line.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    path: PathBuf,
    echo: bool,
    rotate_bytes: u64,
}

impl RunLog {
    pub fn new(paths: &AppPaths, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            path: paths.run_log_path(run_id),
            echo: false,
            rotate_bytes: RUN_LOG_ROTATE_BYTES,
        }
    }

    /// Also print `[level] event data` to stderr.
    pub fn echo_to_stderr(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_line(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "run_id": self.run_id,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_log_if_needed(&self.path, self.rotate_bytes)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;

        if self.echo {
            eprintln!("[{level}] {event} {data}");
        }
        Ok(())
    }
}

/// `run.jsonl` → `run.jsonl.1` → ... → `run.jsonl.{RUN_LOG_MAX_BACKUPS}`; the
/// oldest backup falls off the end.
fn rotate_log_if_needed(path: &Path, rotate_bytes: u64) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() >= rotate_bytes => {}
        _ => return Ok(()),
    }

    let mut chain: Vec<PathBuf> = (1..=RUN_LOG_MAX_BACKUPS)
        .map(|n| backup_path(path, n))
        .collect();
    chain.insert(0, path.to_path_buf());

    if let Some(oldest) = chain.last().filter(|p| p.exists()) {
        std::fs::remove_file(oldest)?;
    }
    for pair in chain.windows(2).rev() {
        if pair[0].exists() {
            std::fs::rename(&pair[0], &pair[1])?;
        }
    }
    Ok(())
}

fn backup_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{generation}"));
    path.with_file_name(name)
}

/// Origin-only form of a URL, for logs that may leave the machine.
pub fn redact_url_for_log(value: &str) -> String {
    let Ok(parsed) = Url::parse(value) else {
        return "[invalid-url]".to_string();
    };
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => format!("{}/...", origin.ascii_serialization()),
        url::Origin::Opaque(_) => format!("{}:...", parsed.scheme()),
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
