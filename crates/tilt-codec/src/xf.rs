//! Row-oriented affine transform stacks (IMOD `.xf` layout).
//!
//! Each non-blank line holds one transform. Six columns are read as
//! `a11 a12 a21 a22 dx dy`; nine columns are read as a row-major 3x3 matrix.

use std::fmt::Write as _;
use std::ops::Index;
use std::path::Path;

use crate::{CodecError, Matrix3, Result, content_lines, parse_number};

/// An ordered stack of transforms, one per aligned image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformStack {
    matrices: Vec<Matrix3>,
}

impl TransformStack {
    pub fn new(matrices: Vec<Matrix3>) -> Self {
        Self { matrices }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let matrices = content_lines(text)
            .map(|(line, content)| parse_row(content, line))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matrices })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let stack = Self::parse(&text)?;
        tracing::trace!(path = %path.as_ref().display(), count = stack.len(), "Read transform stack");
        Ok(stack)
    }

    /// Render in the six-column layout.
    ///
    /// Matrices with a non-homogeneous bottom row cannot be represented and are
    /// written as nine columns instead.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for m in &self.matrices {
            if m.is_affine() {
                let [a11, a12, a21, a22, dx, dy] = m.to_affine();
                let _ = writeln!(out, "{a11} {a12} {a21} {a22} {dx} {dy}");
            } else {
                let cells: Vec<String> = m.rows().iter().flatten().map(|v| v.to_string()).collect();
                let _ = writeln!(out, "{}", cells.join(" "));
            }
        }
        out
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_text())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Matrix3> {
        self.matrices.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Matrix3> {
        self.matrices.iter()
    }

    pub fn into_inner(self) -> Vec<Matrix3> {
        self.matrices
    }
}

impl Index<usize> for TransformStack {
    type Output = Matrix3;

    fn index(&self, position: usize) -> &Matrix3 {
        &self.matrices[position]
    }
}

impl From<Vec<Matrix3>> for TransformStack {
    fn from(matrices: Vec<Matrix3>) -> Self {
        Self::new(matrices)
    }
}

fn parse_row(content: &str, line: usize) -> Result<Matrix3> {
    let values = content
        .split_whitespace()
        .map(|token| parse_number(token, line))
        .collect::<Result<Vec<f64>>>()?;

    match values.as_slice() {
        &[a11, a12, a21, a22, dx, dy] => Ok(Matrix3::from_affine(a11, a12, a21, a22, dx, dy)),
        &[m00, m01, m02, m10, m11, m12, m20, m21, m22] => Ok(Matrix3::from_rows([
            [m00, m01, m02],
            [m10, m11, m12],
            [m20, m21, m22],
        ])),
        other => Err(CodecError::ColumnCount {
            line,
            found: other.len(),
        }),
    }
}
