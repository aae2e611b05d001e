//! # Tilt Codec
//!
//! Plain-text formats exchanged with external tilt-series aligners.
//!
//! ## Formats
//!
//! - Tilt angle lists: one floating-point angle per line (`.tlt`, `.rawtlt`)
//! - Transform stacks: one 2D affine transform per line (`.xf`), either the
//!   six-column `a11 a12 a21 a22 dx dy` layout or a full row-major 3x3 matrix
//!
//! Both formats ignore blank lines and surrounding whitespace.

use thiserror::Error;

pub mod angles;
pub mod matrix;
pub mod xf;

pub use angles::{format_angles, parse_angles, read_angle_file, write_angle_file};
pub use matrix::Matrix3;
pub use xf::TransformStack;

/// Errors produced while decoding or encoding tilt files.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: invalid number '{value}'")]
    InvalidNumber { line: usize, value: String },

    #[error("line {line}: expected 6 or 9 columns, found {found}")]
    ColumnCount { line: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Parse a single whitespace-separated token as `f64`, reporting the 1-based line.
pub(crate) fn parse_number(token: &str, line: usize) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| CodecError::InvalidNumber {
            line,
            value: token.to_string(),
        })
}

/// Iterate over the non-blank lines of `text` together with their 1-based line numbers.
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}
