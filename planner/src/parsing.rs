//! Parsing of the line-oriented step record format.
//!
//! One record per input, `key:value` lines. A value consisting of a single
//! `:` opens a multi-line block terminated by a line containing only `.`;
//! the block lines are kept verbatim and joined with `\n`. Unknown keys are
//! reported through `tracing::warn!` and ignored.

use crate::attributes::Attribute;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid cost `{value}` on line {line}")]
    InvalidCost { value: String, line: usize },
    #[error("empty attribute in list `{text}`")]
    EmptyAttribute { text: String },
    #[error("unterminated multi-line block for key `{key}` starting on line {line}")]
    UnterminatedBlock { key: String, line: usize },
}

/// A parsed step record, before multiplexing.
///
/// Attribute lists are kept as raw atom vectors rather than sets: a record
/// may legitimately name the same key with several values (`two=apple,
/// two=banana`), which an [`crate::AttributeSet`] would collapse. The store
/// fans such records out into one step per combination.
#[derive(Clone, Debug, Default)]
pub struct StepRecord {
    pub short: String,
    pub description: String,
    pub script: String,
    pub cost: u32,
    pub required: bool,
    pub dependencies: Vec<Attribute>,
    pub changes: Vec<Attribute>,
}

/// Parse a comma-separated attribute list (`a,!b,c=1`), whitespace-tolerant.
///
/// Duplicate keys are preserved; collapsing them is the caller's business.
pub fn parse_attribute_list(text: &str) -> Result<Vec<Attribute>, ParseError> {
    let mut atoms = Vec::new();
    if text.trim().is_empty() {
        return Ok(atoms);
    }
    for atom in text.split(',') {
        atoms.push(atom.parse()?);
    }
    Ok(atoms)
}

fn text_to_boolean(text: &str) -> bool {
    text == "1" || text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("yes")
}

/// Parse one step record from text.
pub fn parse_step(text: &str) -> Result<StepRecord, ParseError> {
    let mut record = StepRecord::default();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        let Some((key, raw_value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let mut value = raw_value.trim().to_string();
        if value == ":" {
            // multi-line block, verbatim until a lone `.`
            let opened_on = i;
            let mut block: Vec<&str> = Vec::new();
            loop {
                if i >= lines.len() {
                    return Err(ParseError::UnterminatedBlock {
                        key: key.to_string(),
                        line: opened_on,
                    });
                }
                let body = lines[i];
                i += 1;
                if body == "." {
                    break;
                }
                block.push(body);
            }
            value = block.join("\n");
        }
        match key {
            "short" => record.short = value,
            "description" => record.description = value,
            "script" => record.script = value,
            "dependencies" | "requirements" => record.dependencies = parse_attribute_list(&value)?,
            "changes" => record.changes = parse_attribute_list(&value)?,
            "cost" => {
                record.cost = value
                    .parse()
                    .map_err(|_| ParseError::InvalidCost { value, line: i })?
            }
            "required" => record.required = text_to_boolean(&value),
            unknown => tracing::warn!(key = unknown, "unrecognized key in step record"),
        }
    }
    Ok(record)
}
