//! `hxfer put` – multipart upload of form fields and an optional file.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use hxfer_core::config::XferConfig;
use hxfer_core::outcome::error_chain;
use hxfer_core::{OutcomeSink, TransferError, Upload, UploadListener, UploadScheduler, UploadTask};

use super::TrustArgs;

#[derive(Debug)]
pub struct PutOptions {
    pub url: String,
    pub file: Option<PathBuf>,
    pub fields: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub file_field: Option<String>,
    pub trust: TrustArgs,
}

/// Hands the single terminal callback back to the command's thread.
struct Reply(Mutex<Sender<Result<String, String>>>);

impl Reply {
    fn send(&self, result: Result<String, String>) {
        if let Ok(tx) = self.0.lock() {
            let _ = tx.send(result);
        }
    }
}

impl UploadListener<String> for Reply {
    fn on_start(&self, key: &String) {
        tracing::debug!(key = %key, "upload started");
    }

    fn on_complete(&self, body: &str, _key: &String) {
        self.send(Ok(body.to_string()));
    }

    fn on_error(&self, error: &TransferError, _key: &String) {
        self.send(Err(error_chain(error)));
    }
}

/// Builds the upload from command-line options without touching the network.
fn build_upload(opts: &PutOptions) -> Result<Upload> {
    let mut upload = Upload::new(&opts.url)?
        .headers(opts.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())))
        .context("invalid request header")?
        .trust(opts.trust.policy()?);
    for (name, value) in &opts.fields {
        upload = upload.field(name.as_str(), value.as_str());
    }
    if let Some(field) = &opts.file_field {
        upload = upload.file_field(field.as_str());
    }
    if let Some(file) = &opts.file {
        if !file.is_file() {
            return Err(anyhow!("{} is not a readable file", file.display()));
        }
        upload = upload.file(file);
    }
    Ok(upload)
}

pub fn run_put(cfg: &XferConfig, opts: PutOptions) -> Result<()> {
    let upload = build_upload(&opts)?;

    let sink: Arc<dyn OutcomeSink> = Arc::new(cfg.outcome_sink());
    let scheduler = UploadScheduler::<String>::with_options(cfg.pool_options(), sink);
    let (tx, rx) = mpsc::channel();
    let reply = Arc::new(Reply(Mutex::new(tx)));

    let submitted = scheduler.submit(UploadTask::new(opts.url.clone(), upload), reply);
    let result = match submitted {
        Ok(_) => rx
            .recv()
            .map_err(|_| anyhow!("upload ended without a result")),
        Err(e) => Err(anyhow::Error::new(e).context("could not queue upload")),
    };
    scheduler.shutdown();

    match result? {
        Ok(body) => {
            println!("{}", body);
            Ok(())
        }
        Err(message) => Err(anyhow!("upload to {} failed: {}", opts.url, message)),
    }
}
