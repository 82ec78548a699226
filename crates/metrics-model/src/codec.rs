//! gzip helpers for metric payloads.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::{MetricRecord, Result};

/// Value of the `Content-Encoding` / `Accept-Encoding` headers we speak.
pub const GZIP_ENCODING: &str = "gzip";

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Serialize a batch of records to JSON and gzip it.
pub fn encode_batch(records: &[MetricRecord]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(records)?;
    compress(&json)
}

/// Inverse of [`encode_batch`].
pub fn decode_batch(data: &[u8]) -> Result<Vec<MetricRecord>> {
    let json = decompress(data)?;
    Ok(serde_json::from_slice(&json)?)
}
