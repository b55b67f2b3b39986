//! Text layout of one persisted descriptor set.
//!
//! ```text
//! ORIGINAL_PATH,cats/tabby.jpg
//! 0.01,0.2,0,...
//! 0.13,0,0.07,...
//! ```
//!
//! The first line carries the identity, every following line one vector.
//! Floats use the shortest representation that parses back to the same
//! `f32`, so a record round-trips bit for bit.

use std::fmt::Write as _;

use thiserror::Error;

use crate::descriptor::DescriptorSet;

pub const HEADER_TAG: &str = "ORIGINAL_PATH";

#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
    #[error("record is not valid utf-8")]
    Utf8,

    #[error("missing ORIGINAL_PATH header")]
    MissingHeader,

    #[error("identity must be a single non-empty line")]
    InvalidIdentity,

    #[error("record has no descriptor rows")]
    NoRows,

    #[error("line {line}: not a number: {value:?}")]
    BadNumber { line: usize, value: String },

    #[error("line {line}: expected {expected} components, got {actual}")]
    RaggedRow { line: usize, expected: usize, actual: usize },
}

pub fn encode(set: &DescriptorSet) -> Result<String, RecordError> {
    if set.identity.is_empty() || set.identity.contains(['\n', '\r']) {
        return Err(RecordError::InvalidIdentity);
    }
    if set.vectors.is_empty() {
        return Err(RecordError::NoRows);
    }
    let width = set.dimension().unwrap_or(0);
    let mut out = String::with_capacity(set.identity.len() + 16 + set.len() * width * 8);
    out.push_str(HEADER_TAG);
    out.push(',');
    out.push_str(&set.identity);
    out.push('\n');
    for (i, row) in set.vectors.iter().enumerate() {
        if row.len() != width {
            return Err(RecordError::RaggedRow { line: i + 2, expected: width, actual: row.len() });
        }
        for (j, x) in row.iter().enumerate() {
            if j > 0 { out.push(','); }
            // writing into a String cannot fail
            let _ = write!(out, "{x}");
        }
        out.push('\n');
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<DescriptorSet, RecordError> {
    let text = std::str::from_utf8(bytes).map_err(|_| RecordError::Utf8)?;
    let mut lines = text.lines();
    let identity = lines
        .next()
        .and_then(|h| h.strip_prefix(HEADER_TAG))
        .and_then(|h| h.strip_prefix(','))
        .ok_or(RecordError::MissingHeader)?;
    if identity.is_empty() {
        return Err(RecordError::InvalidIdentity);
    }

    let mut vectors: Vec<Vec<f32>> = Vec::new();
    let mut width: Option<usize> = None;
    for (i, line) in lines.enumerate() {
        let line_no = i + 2;
        if line.trim().is_empty() { continue; }
        let row = line
            .split(',')
            .map(|v| v.trim().parse::<f32>().map_err(|_| RecordError::BadNumber { line: line_no, value: v.to_string() }))
            .collect::<Result<Vec<f32>, _>>()?;
        match width {
            None => width = Some(row.len()),
            Some(w) if w != row.len() => {
                return Err(RecordError::RaggedRow { line: line_no, expected: w, actual: row.len() })
            }
            Some(_) => {}
        }
        vectors.push(row);
    }
    if vectors.is_empty() {
        return Err(RecordError::NoRows);
    }
    Ok(DescriptorSet { identity: identity.to_string(), vectors })
}
