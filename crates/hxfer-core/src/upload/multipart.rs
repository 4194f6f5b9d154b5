//! multipart/form-data body for uploads.
//!
//! Field names, values and the file name are form-urlencoded. The file part is
//! streamed from disk; only the framing around it is held in memory.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::TransferError;

pub const BOUNDARY: &str = "----WebKitFormBoundaryCXRtmcVNK0H70msG";
const CRLF: &str = "\r\n";

/// Form-urlencode `s` (space becomes `+`).
pub fn form_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub fn content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// File part of the form.
#[derive(Debug, Clone, Copy)]
pub(super) struct FilePart<'a> {
    pub field: &'a str,
    pub path: &'a Path,
}

/// Ready-to-send body and its exact length.
pub(super) struct MultipartBody {
    pub len: u64,
    pub reader: Box<dyn Read + Send>,
}

fn field_head(out: &mut String, name: &str) {
    out.push_str("--");
    out.push_str(BOUNDARY);
    out.push_str(CRLF);
    out.push_str("Content-Disposition: form-data; name=\"");
    out.push_str(&form_encode(name));
    out.push('"');
}

/// Framing before the file contents: every field, then the file part header.
fn head(fields: &[(String, String)], file: Option<(&str, &str)>) -> String {
    let mut out = String::new();
    for (name, value) in fields {
        field_head(&mut out, name);
        out.push_str(CRLF);
        out.push_str(CRLF);
        out.push_str(&form_encode(value));
        out.push_str(CRLF);
    }
    if let Some((field, file_name)) = file {
        field_head(&mut out, field);
        out.push_str(";filename=\"");
        out.push_str(&form_encode(file_name));
        out.push('"');
        out.push_str(CRLF);
        out.push_str(CRLF);
    }
    out
}

fn tail(has_file: bool) -> String {
    let mut out = String::new();
    if has_file {
        out.push_str(CRLF);
    }
    out.push_str("--");
    out.push_str(BOUNDARY);
    out.push_str("--");
    out.push_str(CRLF);
    out
}

/// Open the file (if any) and assemble the streamed body.
pub(super) fn build(
    fields: &[(String, String)],
    file: Option<FilePart<'_>>,
) -> Result<MultipartBody, TransferError> {
    let opened = match file {
        Some(part) => {
            let f = File::open(part.path)
                .map_err(|e| TransferError::io(format!("open {}", part.path.display()), e))?;
            let size = f
                .metadata()
                .map_err(|e| TransferError::io(format!("stat {}", part.path.display()), e))?
                .len();
            let name = part
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Some((part.field, name, f, size))
        }
        None => None,
    };

    let head = head(
        fields,
        opened.as_ref().map(|(field, name, _, _)| (*field, name.as_str())),
    )
    .into_bytes();
    let tail = tail(opened.is_some()).into_bytes();
    let file_len = opened.as_ref().map_or(0, |(_, _, _, size)| *size);
    let len = head.len() as u64 + file_len + tail.len() as u64;

    let reader: Box<dyn Read + Send> = match opened {
        // `take` pins the body to the advertised length if the file grows meanwhile.
        Some((_, _, f, size)) => Box::new(Cursor::new(head).chain(f.take(size)).chain(Cursor::new(tail))),
        None => Box::new(Cursor::new(head).chain(Cursor::new(tail))),
    };
    Ok(MultipartBody { len, reader })
}
