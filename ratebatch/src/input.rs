//! Reading work items from files or stdin.
//!
//! Each non-empty line is one item: `ID<delimiter>PAYLOAD`. A line without
//! the delimiter gets the id `line-N`, where N is its 1-based line number.
//! Blank lines and lines starting with `#` are skipped. Ids must be unique.

use ratebatch_lib::WorkItem;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Payload handed to the operation: the raw text plus its id, so external
/// commands and endpoints can see which item they are working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: String,
    pub payload: String,
}

pub type Item = WorkItem<String, Record>;

/// Read items from a file path.
pub fn read_items_from_file(
    file_path: &str,
    delimiter: char,
) -> Result<Vec<Item>, Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {}", file_path).into());
    }

    let file = File::open(path)?;
    parse_items(BufReader::new(file), delimiter)
}

/// Parse items from any buffered reader.
pub fn parse_items<R: BufRead>(
    reader: R,
    delimiter: char,
) -> Result<Vec<Item>, Box<dyn std::error::Error>> {
    let mut items = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("Line {}: error reading line - {}", idx + 1, e))?;
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }

        let (id, payload) = match trimmed.split_once(delimiter) {
            Some((id, payload)) if !id.trim().is_empty() => {
                (id.trim().to_string(), payload.to_string())
            }
            _ => (fallback_id(idx + 1), trimmed.to_string()),
        };

        if let Some(first) = first_seen.insert(id.clone(), idx + 1) {
            return Err(format!(
                "Line {}: duplicate id '{}' (first used on line {})",
                idx + 1,
                id,
                first
            )
            .into());
        }

        items.push(WorkItem::new(id.clone(), Record { id, payload }));
    }

    Ok(items)
}

fn fallback_id(line_number: usize) -> String {
    format!("line-{}", line_number)
}
