//! Wire codec for scan payloads: `LANMAP1:<compression>:<base64>`.
//!
//! Decoding is fail-fast: the first violation aborts the whole payload, so a
//! partially valid snapshot never reaches the store.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io::{Read, Write};

use crate::config::PayloadLimits;
use crate::error::PayloadError;
use crate::model::{
    Compression, ContentType, DecodedPayload, HostInfo, ImportPayloadData, NodeType, PayloadData,
    ValidatedEntry,
};
use crate::paths::{depth, is_hidden, normalize_path};

pub const PAYLOAD_PREFIX: &str = "LANMAP1:";

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode, decompress, parse and validate a payload string.
pub fn decode_payload(payload: &str, limits: &PayloadLimits) -> Result<DecodedPayload, PayloadError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::BadFormat("payload is required".to_string()));
    }
    if trimmed.len() > limits.max_encoded_bytes {
        return Err(PayloadError::BadFormat(format!(
            "payload exceeds {} bytes",
            limits.max_encoded_bytes
        )));
    }
    if !trimmed.starts_with(PAYLOAD_PREFIX) {
        return Err(PayloadError::BadPrefix);
    }

    let segments: Vec<&str> = trimmed.split(':').collect();
    if segments.len() < 3 {
        return Err(PayloadError::BadFormat(
            "payload format must be LANMAP1:<compression>:<base64>".to_string(),
        ));
    }

    let compression = match segments[1] {
        "gzip-base64" => Compression::Gzip,
        "deflate-base64" => Compression::Deflate,
        other => return Err(PayloadError::UnsupportedCompression(other.to_string())),
    };
    let body = segments[2..].join(":");

    let decoded = decode_body(compression, &body, limits.max_decoded_bytes)?;
    let json: Value = serde_json::from_slice(&decoded)?;
    let data = validate_payload_shape(&json, limits)?;

    Ok(DecodedPayload {
        compression,
        raw_byte_size: decoded.len(),
        data,
    })
}

/// Serialize and compress a payload body into the wire string.
pub fn encode_payload(data: &PayloadData, compression: Compression) -> std::io::Result<String> {
    let json = serde_json::to_vec(data).map_err(std::io::Error::other)?;

    let compressed = match compression {
        Compression::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&json)?;
            enc.finish()?
        }
        Compression::Deflate => {
            let mut enc = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&json)?;
            enc.finish()?
        }
    };

    let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
    Ok(format!("{PAYLOAD_PREFIX}{}:{encoded}", compression.tag()))
}

fn decode_body(compression: Compression, body: &str, max_decoded: usize) -> Result<Vec<u8>, PayloadError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let raw = LENIENT_BASE64
        .decode(compact.as_bytes())
        .map_err(|e| PayloadError::DecodeFailure(format!("invalid base64: {e}")))?;

    match compression {
        Compression::Gzip => inflate_bounded(GzDecoder::new(raw.as_slice()), max_decoded),
        // Raw deflate per the wire format; zlib-wrapped streams from older scanners are accepted too.
        Compression::Deflate if looks_like_zlib(&raw) => {
            inflate_bounded(ZlibDecoder::new(raw.as_slice()), max_decoded)
        }
        Compression::Deflate => inflate_bounded(DeflateDecoder::new(raw.as_slice()), max_decoded),
    }
}

fn looks_like_zlib(raw: &[u8]) -> bool {
    let [cmf, flg, ..] = *raw else {
        return false;
    };
    cmf & 0x0F == 8 && cmf >> 4 <= 7 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

/// Read at most `max_decoded + 1` bytes so an oversized stream is detected
/// without ever being fully inflated.
fn inflate_bounded<R: Read>(reader: R, max_decoded: usize) -> Result<Vec<u8>, PayloadError> {
    let mut out = Vec::new();
    reader
        .take(max_decoded as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| PayloadError::DecodeFailure(e.to_string()))?;

    if out.len() > max_decoded {
        return Err(PayloadError::DecodeFailure(format!(
            "decompressed payload exceeds {max_decoded} bytes"
        )));
    }
    Ok(out)
}

/// Accepts RFC 3339 / RFC 2822 timestamps, naive ISO date-times (taken as UTC)
/// and plain `YYYY-MM-DD` dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn ensure_string<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a str, PayloadError> {
    match value.and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(PayloadError::schema(field, "must not be empty")),
        None => Err(PayloadError::schema(field, "must be a string")),
    }
}

/// Field value, treating an explicit JSON `null` as absent.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, PayloadError> {
    match present(obj, key) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(PayloadError::schema(key, "must be a string")),
    }
}

fn validate_payload_shape(value: &Value, limits: &PayloadLimits) -> Result<ImportPayloadData, PayloadError> {
    let obj = value
        .as_object()
        .ok_or_else(|| PayloadError::schema("payload", "is not an object"))?;

    if obj.get("version").and_then(Value::as_str) != Some("1") {
        return Err(PayloadError::schema("version", "must be '1'"));
    }

    let generated_raw = ensure_string(obj.get("generatedAt"), "generatedAt")?;
    let generated_at = parse_timestamp(generated_raw)
        .ok_or_else(|| PayloadError::schema("generatedAt", format!("unparseable timestamp '{generated_raw}'")))?;

    let root_path = ensure_string(obj.get("rootPath"), "rootPath")?.to_string();
    let run_path = optional_string(obj, "runPath")?;
    let run_parent_path = optional_string(obj, "runParentPath")?;

    let host_obj = obj
        .get("host")
        .and_then(Value::as_object)
        .ok_or_else(|| PayloadError::schema("host", "missing host metadata"))?;
    let host = HostInfo {
        label: ensure_string(host_obj.get("label"), "host.label")?.trim().to_string(),
        address: ensure_string(host_obj.get("address"), "host.address")?.trim().to_string(),
    };

    let raw_entries = obj
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(|| PayloadError::schema("entries", "must be an array"))?;
    if raw_entries.len() > limits.max_entries {
        return Err(PayloadError::schema(
            "entries",
            format!("{} entries exceed the limit of {}", raw_entries.len(), limits.max_entries),
        ));
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(raw_entries.len());
    let mut entries = Vec::with_capacity(raw_entries.len());
    for (index, raw) in raw_entries.iter().enumerate() {
        let entry = validate_entry(index, raw, limits)?;
        if !seen.insert(entry.path.clone()) {
            return Err(PayloadError::DuplicatePath(entry.path));
        }
        entries.push(entry);
    }

    Ok(ImportPayloadData {
        version: "1".to_string(),
        generated_at,
        root_path,
        run_path,
        run_parent_path,
        host,
        entries,
    })
}

fn validate_entry(index: usize, raw: &Value, limits: &PayloadLimits) -> Result<ValidatedEntry, PayloadError> {
    let field = |name: &str| format!("entries[{index}].{name}");

    let obj = raw
        .as_object()
        .ok_or_else(|| PayloadError::schema(format!("entries[{index}]"), "must be an object"))?;

    let raw_path = obj
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::schema(field("path"), "must be a string"))?;
    let path = normalize_path(raw_path).map_err(|source| PayloadError::InvalidPath {
        raw: raw_path.to_string(),
        source,
    })?;
    if depth(&path) > limits.max_path_depth {
        return Err(PayloadError::schema(
            field("path"),
            format!("nesting deeper than {} levels: {path}", limits.max_path_depth),
        ));
    }

    let name = ensure_string(obj.get("name"), &field("name"))?.to_string();

    let node_type = match obj.get("type").and_then(Value::as_str) {
        Some("file") => NodeType::File,
        Some("dir") => NodeType::Dir,
        _ => return Err(PayloadError::schema(field("type"), format!("must be 'file' or 'dir' for path {path}"))),
    };

    let content = match present(obj, "content") {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(PayloadError::schema(field("content"), format!("must be a string for path {path}"))),
    };
    if node_type == NodeType::Dir && content.is_some() {
        return Err(PayloadError::DirectoryHasContent(path));
    }

    let declared_type = match present(obj, "contentType") {
        None => None,
        Some(v) => match v.as_str().and_then(ContentType::parse) {
            Some(ct) => Some(ct),
            None => {
                return Err(PayloadError::schema(
                    field("contentType"),
                    format!("must be text, binary or none for path {path}"),
                ))
            }
        },
    };
    if node_type == NodeType::Dir && declared_type.is_some_and(|ct| ct != ContentType::None) {
        return Err(PayloadError::schema(
            field("contentType"),
            format!("directory contentType must be none: {path}"),
        ));
    }

    let size = match present(obj, "size") {
        None => None,
        Some(v) => Some(validate_size(v).ok_or_else(|| {
            PayloadError::schema(field("size"), format!("must be a non-negative number for path {path}"))
        })?),
    };

    let mtime = match present(obj, "mtime") {
        None => None,
        Some(v) => Some(v.as_str().and_then(parse_timestamp).ok_or_else(|| {
            PayloadError::schema(field("mtime"), format!("unparseable timestamp for path {path}"))
        })?),
    };

    let hidden = match present(obj, "isHidden") {
        None => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => return Err(PayloadError::schema(field("isHidden"), format!("must be a boolean for path {path}"))),
    };

    let sha256 = match present(obj, "sha256") {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(PayloadError::schema(field("sha256"), format!("must be a string for path {path}"))),
    };

    let content_type = declared_type.unwrap_or(match node_type {
        NodeType::Dir => ContentType::None,
        NodeType::File => ContentType::Binary,
    });

    Ok(ValidatedEntry {
        is_hidden: hidden.unwrap_or_else(|| is_hidden(&path)),
        path,
        name,
        node_type,
        size,
        mtime,
        content_type,
        content,
        sha256,
    })
}

fn validate_size(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    let f = v.as_f64()?;
    (f.is_finite() && f >= 0.0).then(|| f.floor() as u64)
}
