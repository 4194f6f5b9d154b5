//! CLI for the hxfer transfer manager.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hxfer_core::config;

use commands::{run_get, run_put, GetOptions, PutOptions, TrustArgs};

/// Top-level CLI for hxfer.
#[derive(Debug, Parser)]
#[command(name = "hxfer")]
#[command(about = "hxfer: prioritized HTTP(S) downloads and multipart uploads", long_about = None)]
pub struct Cli {
    /// Log every target at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs, one task per URL.
    Get {
        /// Direct HTTP/HTTPS URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory to save into (default: current directory).
        #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Continue partially downloaded files with a Range request.
        #[arg(long)]
        resume: bool,

        /// Queue priority shared by every URL of this invocation.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,

        /// Larger priorities run first (default: smaller first).
        #[arg(long)]
        desc: bool,

        #[command(flatten)]
        trust: TrustArgs,
    },

    /// Upload form fields and an optional file as multipart/form-data.
    Put {
        /// Direct HTTP/HTTPS URL to post to.
        url: String,

        /// File to attach.
        file: Option<PathBuf>,

        /// Form field, repeatable.
        #[arg(short = 'F', long = "field", value_name = "NAME=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Request header, repeatable. `connectTimeout` and `readTimeout` take milliseconds.
        #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Form field name of the attached file.
        #[arg(long, value_name = "NAME")]
        file_field: Option<String>,

        #[command(flatten)]
        trust: TrustArgs,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", s))?;
    if name.is_empty() {
        return Err("field name must not be empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {:?}", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match self.command {
            CliCommand::Get {
                urls,
                output_dir,
                resume,
                priority,
                desc,
                trust,
            } => {
                let output_dir = match output_dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                run_get(
                    &cfg,
                    GetOptions {
                        urls,
                        output_dir,
                        resume,
                        priority,
                        desc,
                        trust,
                    },
                )?;
            }
            CliCommand::Put {
                url,
                file,
                fields,
                headers,
                file_field,
                trust,
            } => run_put(
                &cfg,
                PutOptions {
                    url,
                    file,
                    fields,
                    headers,
                    file_field,
                    trust,
                },
            )?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
