//! Line-oriented subnet list input.
//!
//! Subnet feeds are plain text with one CIDR entry per line. Blank lines and
//! `#` comments are dropped here; anything else is handed to the index, which
//! skips entries it cannot parse.

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Split list content into candidate entries.
///
/// # Examples
/// ```
/// use shortcut::lists::parse_subnets;
/// let entries = parse_subnets("# cn\n1.0.1.0/24\n\n  1.0.2.0/23  \n");
/// assert_eq!(entries, vec!["1.0.1.0/24", "1.0.2.0/23"]);
/// ```
pub fn parse_subnets(content: &str) -> Vec<String> {
    content.lines().filter_map(clean_line).collect()
}

/// Read candidate entries from any reader.
pub fn read_lines<R: Read>(reader: R) -> io::Result<Vec<String>> {
    let mut entries = Vec::new();
    for line in BufReader::new(reader).lines() {
        if let Some(entry) = clean_line(&line?) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Read candidate entries from a file.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open subnet list: {:?}", path))?;
    let entries =
        read_lines(file).with_context(|| format!("Failed to read subnet list: {:?}", path))?;
    tracing::debug!(path = ?path, entries = entries.len(), "Loaded subnet list");
    Ok(entries)
}

fn clean_line(line: &str) -> Option<String> {
    // Feeds saved by some editors start with a byte-order mark
    let trimmed = line.trim_start_matches('\u{FEFF}').trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        None
    } else {
        Some(trimmed.to_string())
    }
}
