//! Body decoding for display.
//!
//! Raw bodies arrive as bytes with whatever content-encoding the server
//! used. This module truncates them to a capture cap, undoes gzip/deflate
//! (and brotli, best effort), and decides whether the result is safe to
//! show as text or should be replaced with a binary placeholder.
//!
//! Nothing here fails: every decompression or decode error degrades to the
//! raw bytes or a lossy string, and the binary heuristic handles the rest.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};

use crate::record::Header;

/// Maximum number of body bytes captured per direction.
pub const MAX_BODY_CAPTURE: usize = 100 * 1024;

/// Sample length for the binary-likelihood heuristic.
const BINARY_SAMPLE_CHARS: usize = 2000;

/// Control/replacement-character ratio above which text is treated as binary.
const BINARY_RATIO_THRESHOLD: f64 = 0.08;

/// Content-type fragments that mark a body as textual.
const TEXTUAL_CONTENT_HINTS: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-www-form-urlencoded",
    "application/graphql",
    "application/x-ndjson",
];

/// Content-type fragments that mark a body as binary.
const BINARY_CONTENT_HINTS: &[&str] = &[
    "application/octet-stream",
    "application/x-protobuf",
    "application/protobuf",
    "application/grpc",
    "application/pdf",
    "application/zip",
    "image/",
    "audio/",
    "video/",
    "font/",
];

/// Cuts a raw body to the capture cap.
///
/// Callers compute the truncation flag against the original length, not the
/// returned slice.
pub fn truncate_body(data: &[u8]) -> &[u8] {
    if data.len() <= MAX_BODY_CAPTURE {
        data
    } else {
        &data[..MAX_BODY_CAPTURE]
    }
}

/// Case-insensitive first-match header lookup over an ordered collection.
///
/// Returns an empty string when the header is absent.
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> &'a str {
    let target = name.to_ascii_lowercase();
    headers
        .iter()
        .find(|h| h.name.to_ascii_lowercase() == target)
        .map(|h| h.value.as_str())
        .unwrap_or("")
}

/// Decodes raw body bytes into a displayable string.
///
/// Undoes the transport content-encoding, decodes as UTF-8 (lossy on
/// failure), and returns either the text or a
/// `[binary body omitted: <type>; <n> bytes]` placeholder when the declared
/// content-type, a decode failure, or the control-character heuristic says
/// the body is not text. The byte count in the placeholder is the length of
/// `data` as passed in.
pub fn decode_for_display(data: &[u8], headers: &[Header]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let content_type = header_value(headers, "content-type").to_ascii_lowercase();
    let content_encoding = header_value(headers, "content-encoding").to_ascii_lowercase();

    let declared_binary = BINARY_CONTENT_HINTS
        .iter()
        .any(|hint| content_type.contains(hint));
    let declared_textual = TEXTUAL_CONTENT_HINTS
        .iter()
        .any(|hint| content_type.contains(hint));

    let decoded_bytes = undo_content_encoding(data, &content_encoding);
    let (text, had_decode_issue) = safe_decode(&decoded_bytes);

    if (declared_binary && !declared_textual)
        || (had_decode_issue && !declared_textual)
        || looks_binary(&text)
    {
        let kind = if content_type.is_empty() {
            "binary/unknown"
        } else {
            &content_type
        };
        return format!("[binary body omitted: {kind}; {} bytes]", data.len());
    }

    text
}

/// Undoes gzip/deflate/brotli content-encoding; passes bytes through
/// unchanged on any failure or unrecognized encoding.
fn undo_content_encoding<'a>(data: &'a [u8], encoding: &str) -> Cow<'a, [u8]> {
    let inflated = if encoding.contains("gzip") {
        gunzip(data)
    } else if encoding.contains("deflate") {
        inflate_zlib(data)
    } else if encoding.contains("br") {
        unbrotli(data)
    } else {
        None
    };
    match inflated {
        Some(bytes) => Cow::Owned(bytes),
        None => Cow::Borrowed(data),
    }
}

fn gunzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

fn inflate_zlib(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

fn unbrotli(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    brotli::Decompressor::new(data, 4096)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

/// Decodes bytes as UTF-8, falling back to lossy replacement.
///
/// The boolean reports whether the lossy path was taken.
fn safe_decode(data: &[u8]) -> (String, bool) {
    if data.is_empty() {
        return (String::new(), false);
    }
    match std::str::from_utf8(data) {
        Ok(text) => (text.to_string(), false),
        Err(_) => (String::from_utf8_lossy(data).into_owned(), true),
    }
}

/// Heuristic: does decoded text look like binary data?
///
/// Counts control characters (below 0x20, excluding tab/newline/carriage
/// return) and Unicode replacement characters over the first 2000 chars.
fn looks_binary(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let mut sample_len = 0usize;
    let mut suspicious = 0usize;
    for c in text.chars().take(BINARY_SAMPLE_CHARS) {
        sample_len += 1;
        if (c as u32) < 32 && !matches!(c, '\n' | '\r' | '\t') {
            suspicious += 1;
        } else if c == '\u{FFFD}' {
            suspicious += 1;
        }
    }
    let ratio = suspicious as f64 / sample_len.max(1) as f64;
    ratio > BINARY_RATIO_THRESHOLD
}
