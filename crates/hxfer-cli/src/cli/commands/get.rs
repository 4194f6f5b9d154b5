//! `hxfer get` – download URLs through a download scheduler.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use hxfer_core::config::XferConfig;
use hxfer_core::outcome::error_chain;
use hxfer_core::{
    Download, DownloadListener, DownloadScheduler, DownloadTask, OutcomeSink, SortOrder,
    Submission, TransferError,
};

use super::TrustArgs;

/// Fallback when the URL path yields no usable name.
const DEFAULT_FILENAME: &str = "download.bin";
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct GetOptions {
    pub urls: Vec<String>,
    pub output_dir: PathBuf,
    pub resume: bool,
    pub priority: i64,
    pub desc: bool,
    pub trust: TrustArgs,
}

enum Event {
    Progress {
        key: String,
        done: u64,
        total: Option<u64>,
    },
    Complete {
        key: String,
        path: PathBuf,
    },
    Failed {
        key: String,
        message: String,
    },
}

/// Forwards callbacks from worker threads to the command's thread.
struct Reporter(Mutex<Sender<Event>>);

impl Reporter {
    fn send(&self, event: Event) {
        if let Ok(tx) = self.0.lock() {
            let _ = tx.send(event);
        }
    }
}

impl DownloadListener<String> for Reporter {
    fn on_start(&self, key: &String) {
        tracing::debug!(key = %key, "download started");
    }

    fn on_progress(&self, done: u64, total: Option<u64>, key: &String) {
        self.send(Event::Progress {
            key: key.clone(),
            done,
            total,
        });
    }

    fn on_complete(&self, path: &Path, key: &String) {
        self.send(Event::Complete {
            key: key.clone(),
            path: path.to_path_buf(),
        });
    }

    fn on_error(&self, error: &TransferError, key: &String) {
        self.send(Event::Failed {
            key: key.clone(),
            message: error_chain(error),
        });
    }
}

pub fn run_get(cfg: &XferConfig, opts: GetOptions) -> Result<()> {
    let policy = opts.trust.policy()?;
    let order = if opts.desc {
        SortOrder::Desc
    } else {
        SortOrder::Asc
    };
    std::fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("failed to create {}", opts.output_dir.display()))?;

    // Validate everything before the first submission.
    let mut tasks = Vec::with_capacity(opts.urls.len());
    for url in &opts.urls {
        let dest = opts.output_dir.join(output_name(url));
        let download = Download::new(url, dest)?
            .resume(opts.resume)
            .trust(policy.clone());
        tasks.push(DownloadTask::new(url.clone(), download).with_priority(opts.priority, order));
    }

    let sink: Arc<dyn OutcomeSink> = Arc::new(cfg.outcome_sink());
    let scheduler = DownloadScheduler::<String>::with_options(cfg.pool_options(), sink);
    let (tx, rx) = mpsc::channel();
    let reporter = Arc::new(Reporter(Mutex::new(tx)));

    let mut pending = 0usize;
    for task in tasks {
        match scheduler.submit(task, reporter.clone()) {
            Ok(Submission::Queued) => pending += 1,
            Ok(Submission::Attached) => {}
            Err(e) => {
                scheduler.shutdown();
                return Err(e).context("could not queue download");
            }
        }
    }
    let total = pending;
    tracing::info!(tasks = total, workers = scheduler.max_workers(), "downloads queued");

    let mut last_print: HashMap<String, Instant> = HashMap::new();
    let mut failed = 0usize;
    while pending > 0 {
        let Ok(event) = rx.recv() else { break };
        match event {
            Event::Progress { key, done, total } => {
                let now = Instant::now();
                let due = last_print
                    .get(&key)
                    .map_or(true, |t| now.duration_since(*t) >= PROGRESS_INTERVAL);
                if due || Some(done) == total {
                    println!("  {}  {}", format_progress(done, total), key);
                    last_print.insert(key, now);
                }
            }
            Event::Complete { key, path } => {
                println!("done  {} -> {}", key, path.display());
                pending -= 1;
            }
            Event::Failed { key, message } => {
                eprintln!("failed  {}: {}", key, message);
                failed += 1;
                pending -= 1;
            }
        }
    }
    scheduler.shutdown();

    if failed > 0 {
        bail!("{} of {} download(s) failed", failed, total);
    }
    Ok(())
}

fn format_progress(done: u64, total: Option<u64>) -> String {
    let done_mib = done as f64 / 1_048_576.0;
    match total {
        Some(total) if total > 0 => format!(
            "{:.1} / {:.1} MiB ({:.1}%)",
            done_mib,
            total as f64 / 1_048_576.0,
            done as f64 * 100.0 / total as f64
        ),
        _ => format!("{:.1} MiB", done_mib),
    }
}

/// Local file name for `url`: its last path segment, made safe for Linux.
pub(crate) fn output_name(url: &str) -> String {
    let segment = url::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut s| s.rfind(|seg| !seg.is_empty()).map(str::to_string))
    });
    let Some(raw) = segment else {
        return DEFAULT_FILENAME.to_string();
    };
    let name = sanitize(&raw);
    if name.is_empty() || name == "." || name == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        name
    }
}

/// Replaces separators, NUL and control characters with `_`, collapses runs
/// of `_`, trims dots and underscores, and caps the length at NAME_MAX.
fn sanitize(name: &str) -> String {
    const NAME_MAX: usize = 255;
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c == '/' || c == '\\' || c.is_control() || c.is_whitespace() {
            '_'
        } else {
            c
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut take = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}
