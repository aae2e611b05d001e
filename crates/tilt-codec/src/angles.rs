//! Newline-delimited tilt angle lists.

use std::fmt::Write as _;
use std::path::Path;

use crate::{Result, content_lines, parse_number};

/// Parse one angle per non-blank line.
///
/// Only the first whitespace-separated token of a line is read, which also
/// accepts the two-column `angle dose` variant some tools write.
pub fn parse_angles(text: &str) -> Result<Vec<f64>> {
    content_lines(text)
        .map(|(line, content)| {
            let token = content.split_whitespace().next().unwrap_or(content);
            parse_number(token, line)
        })
        .collect()
}

/// Render angles one per line, with a trailing newline.
pub fn format_angles(angles: &[f64]) -> String {
    let mut out = String::with_capacity(angles.len() * 8);
    for angle in angles {
        let _ = writeln!(out, "{angle}");
    }
    out
}

pub fn read_angle_file(path: impl AsRef<Path>) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let angles = parse_angles(&text)?;
    tracing::trace!(path = %path.as_ref().display(), count = angles.len(), "Read angle file");
    Ok(angles)
}

pub fn write_angle_file(path: impl AsRef<Path>, angles: &[f64]) -> Result<()> {
    std::fs::write(path.as_ref(), format_angles(angles))?;
    Ok(())
}
