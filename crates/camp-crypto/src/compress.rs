//! Response payload decompression.
//!
//! When the server sets `compressed: true` it gzips (or zlib/raw-deflates)
//! the JSON, base64-encodes the stream and encrypts that text. The framing
//! is detected from the stream header.

use std::io::{Read, Write};

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use flate2::Compression;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on an inflated response payload (16 MiB).
pub const MAX_INFLATED_BYTES: u64 = 16 * 1024 * 1024;

/// Inflate a gzip, zlib or raw DEFLATE stream of at most [`MAX_INFLATED_BYTES`].
pub fn inflate(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    inflate_capped(data, MAX_INFLATED_BYTES)
}

/// Inflate `data`, failing once the output would exceed `limit` bytes.
pub fn inflate_capped(data: &[u8], limit: u64) -> anyhow::Result<Vec<u8>> {
    if data.starts_with(&GZIP_MAGIC) {
        read_capped(GzDecoder::new(data), limit, "gzip")
    } else if is_zlib_header(data) {
        read_capped(ZlibDecoder::new(data), limit, "zlib")
    } else {
        read_capped(DeflateDecoder::new(data), limit, "deflate")
    }
}

fn read_capped<R: Read>(decoder: R, limit: u64, framing: &str) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    decoder
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .with_context(|| format!("{framing} inflate"))?;
    if out.len() as u64 > limit {
        anyhow::bail!("{framing} payload inflates past {limit} bytes");
    }
    Ok(out)
}

/// Decode base64 text, inflate it and return the UTF-8 result.
pub fn inflate_base64(text: &str) -> anyhow::Result<String> {
    let packed = STANDARD
        .decode(text.trim())
        .context("compressed payload is not valid base64")?;
    let raw = inflate(&packed)?;
    String::from_utf8(raw).map_err(|_| anyhow::anyhow!("decompressed payload is not UTF-8"))
}

/// Gzip `text` and base64-encode it (the server-side framing).
pub fn gzip_base64(text: &str) -> anyhow::Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).context("gzip write")?;
    let packed = encoder.finish().context("gzip finish")?;
    Ok(STANDARD.encode(packed))
}

/// RFC 1950: CM = 8, CINFO <= 7, header checksum divisible by 31.
fn is_zlib_header(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8 && cmf >> 4 <= 7 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}
