// src/labels/mod.rs

//! Parsing of SAS label description files.
//!
//! A label file holds many lookup tables, each introduced by a marker token
//! (e.g. `i94cntyl`) and closed by the next `;`:
//!
//! ```text
//! value i94visa
//!    1 = 'Business'
//!    2 = 'Pleasure'
//! ;
//! ```

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::error::{EtlError, Result};

/// One `code = value` pair from a label block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelRecord {
    pub code: String,
    pub value: String,
}

impl LabelRecord {
    pub fn new(code: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            value: value.into(),
        }
    }
}

/// The lines of a single marker-delimited block, header line excluded.
#[derive(Debug)]
pub struct LabelBlock<'a> {
    marker: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> LabelBlock<'a> {
    /// Find the first occurrence of `marker` in `text` and cut the block at the
    /// next `;`.
    pub fn locate(text: &'a str, marker: &'a str) -> Result<Self> {
        let start = text.find(marker).ok_or_else(|| EtlError::NotFound {
            marker: marker.to_string(),
        })?;
        let rest = &text[start..];
        let end = rest.find(';').ok_or_else(|| EtlError::UnterminatedBlock {
            marker: marker.to_string(),
        })?;

        let lines: Vec<&str> = rest[..end].lines().skip(1).collect();
        trace!(marker, offset = start, lines = lines.len(), "located block");
        Ok(Self { marker, lines })
    }

    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }

    /// Parse every line holding a `=` into a record, in file order.
    pub fn records(&self) -> Result<Vec<LabelRecord>> {
        let mut out = Vec::with_capacity(self.lines.len());
        for (idx, line) in self.lines.iter().enumerate() {
            let Some((code, value)) = line.split_once('=') else {
                continue;
            };
            let (code, value) = (code.trim(), value.trim());
            if code.is_empty() || value.is_empty() {
                return Err(EtlError::Parse {
                    marker: self.marker.to_string(),
                    // +2: 1-based, and the header line was dropped
                    line_no: idx + 2,
                    line: line.to_string(),
                });
            }
            out.push(LabelRecord::new(unquote(code), unquote(value)));
        }
        Ok(out)
    }
}

/// Extract the records of the block introduced by `marker`.
#[instrument(level = "debug", skip(text), fields(text_len = text.len()))]
pub fn extract_labels(text: &str, marker: &str) -> Result<Vec<LabelRecord>> {
    let block = LabelBlock::locate(text, marker)?;
    let records = block.records()?;
    debug!(
        lines = block.lines().len(),
        records = records.len(),
        "parsed label block"
    );
    Ok(records)
}

/// Strip one leading `'` and, when present, the matching trailing one.
fn unquote(token: &str) -> &str {
    match token.strip_prefix('\'') {
        Some(inner) => inner.strip_suffix('\'').unwrap_or(inner),
        None => token,
    }
}
