//! Content-addressed `.csv.gz` cache for backtest inputs.
//!
//! Identical `(name, start, end, kwargs)` always maps to the same file, so
//! reruns are reproducible and concurrent writers of one key are harmless.

use super::frame::{cell_text, Frame};
use crate::provider::cache::{canonical_json, write_atomic};
use crate::types::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FrameCache {
    dir: PathBuf,
}

impl FrameCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First 16 hex chars of SHA-256 over the sorted-key JSON of the request.
    pub fn key(name: &str, start: &str, end: &str, kwargs: &Map<String, Value>) -> String {
        let payload = canonical_json(&json!({
            "name": name,
            "start": start,
            "end": end,
            "kwargs": kwargs,
        }));
        let digest = Sha256::digest(payload.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..16].to_string()
    }

    /// `{source}_{start}_{end}_{key}`.
    pub fn base_name(source: &str, start: &str, end: &str, kwargs: &Map<String, Value>) -> String {
        format!("{}_{}_{}_{}", source, start, end, Self::key(source, start, end, kwargs))
    }

    pub fn path(&self, base: &str) -> PathBuf {
        self.dir.join(format!("{}.csv.gz", base))
    }

    /// Cached frame, if present and readable.
    pub async fn load(&self, base: &str) -> Option<Frame> {
        let path = self.path(base);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match decode_csv_gz(&bytes) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "backtest_cache_unreadable");
                None
            }
        }
    }

    pub async fn store(&self, base: &str, frame: &Frame) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(base);
        write_atomic(&path, &encode_csv_gz(frame)?).await?;
        Ok(path)
    }
}

pub fn encode_csv_gz(frame: &Frame) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    if !frame.columns().is_empty() {
        writer.write_record(frame.columns())?;
        for row in frame.rows() {
            writer.write_record(row.values().iter().map(cell_text))?;
        }
    }
    let plain = writer
        .into_inner()
        .map_err(|e| Error::internal(format!("csv flush failed: {}", e)))?;

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&plain)?;
    Ok(gz.finish()?)
}

pub fn decode_csv_gz(bytes: &[u8]) -> Result<Frame> {
    let mut plain = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut plain)?;
    if plain.is_empty() {
        return Ok(Frame::default());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(plain.as_slice());
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut frame = Frame::new(columns);
    for record in reader.records() {
        let record = record?;
        frame.push_row(record.iter().map(infer_cell).collect());
    }
    Ok(frame)
}

/// Text cell back to JSON. Codes with leading zeros stay strings.
pub fn infer_cell(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    let digits = text.strip_prefix('-').unwrap_or(text);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if leading_zero {
        return Value::String(text.to_string());
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() && !text.chars().any(char::is_alphabetic) {
            return Value::from(f);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}
