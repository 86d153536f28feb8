//! Raw array data accepted by the graph.
//!
//! # Array Representation
//!
//! Every node stores its forward value and gradient as a [`Ten64`], a
//! dynamic-rank `f64` array from [`ndarray`]. This module turns the ways a
//! caller usually has numbers at hand into that representation:
//!
//! - scalars (`f64`, `f32`, `i32`) become 0-d arrays
//! - nested fixed-size arrays and `Vec`s become n-d arrays, outermost list first
//! - any `ndarray` array of `f64` is converted to dynamic rank
//! - JSON-style text literals are parsed by [`parse_tensor`]
//!
//! ## Limitations
//! - Row-major only
//! - Nested lists must be rectangular; ragged input is rejected
//! - Element type is always `f64`
//!
//! ## Example
//!
//! ```rust
//! use tensorgrad::tensors::{parse_tensor, IntoTensor};
//!
//! let a = [[1.0_f64, 2.0, 3.0], [4.0, 5.0, 6.0]].into_tensor().unwrap();
//! let b = parse_tensor("[[1, 2, 3], [4, 5, 6]]").unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.shape(), &[2, 3]);
//! ```

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};

use crate::error::{AutogradError, Result};

/// Dynamic-rank `f64` array used for node data and gradients.
pub type Ten64 = ArrayD<f64>;

/// Conversion of raw numeric data into a [`Ten64`].
///
/// Implemented for scalars, `ndarray` arrays, and (possibly nested) fixed-size
/// arrays and vectors of convertible items.
pub trait IntoTensor {
    /// Converts `self` into an owned dynamic-rank array.
    ///
    /// # Errors
    /// Fails with [`AutogradError::ShapeMismatch`] when nested lists are ragged.
    fn into_tensor(self) -> Result<Ten64>;
}

impl IntoTensor for f64 {
    fn into_tensor(self) -> Result<Ten64> {
        Ok(ArrayD::from_elem(IxDyn(&[]), self))
    }
}

impl IntoTensor for f32 {
    fn into_tensor(self) -> Result<Ten64> {
        f64::from(self).into_tensor()
    }
}

impl IntoTensor for i32 {
    fn into_tensor(self) -> Result<Ten64> {
        f64::from(self).into_tensor()
    }
}

impl<S, D> IntoTensor for ArrayBase<S, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    fn into_tensor(self) -> Result<Ten64> {
        Ok(self.into_owned().into_dyn())
    }
}

impl<T: IntoTensor, const N: usize> IntoTensor for [T; N] {
    fn into_tensor(self) -> Result<Ten64> {
        let rows = self
            .into_iter()
            .map(IntoTensor::into_tensor)
            .collect::<Result<Vec<_>>>()?;
        stack_rows(rows)
    }
}

impl<T: IntoTensor> IntoTensor for Vec<T> {
    fn into_tensor(self) -> Result<Ten64> {
        let rows = self
            .into_iter()
            .map(IntoTensor::into_tensor)
            .collect::<Result<Vec<_>>>()?;
        stack_rows(rows)
    }
}

/// Stacks equally shaped arrays along a new leading axis.
///
/// An empty list yields a 1-d array of length 0.
fn stack_rows(rows: Vec<Ten64>) -> Result<Ten64> {
    let Some(first) = rows.first() else {
        return Ok(ArrayD::zeros(IxDyn(&[0])));
    };
    let inner = first.shape().to_vec();
    if let Some(ragged) = rows.iter().find(|row| row.shape() != inner.as_slice()) {
        return Err(AutogradError::shape_mismatch("stack", &inner, ragged.shape()));
    }

    let mut shape = Vec::with_capacity(inner.len() + 1);
    shape.push(rows.len());
    shape.extend_from_slice(&inner);

    let data: Vec<f64> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

/// Parses a JSON-style numeric literal into a [`Ten64`].
///
/// # Format
/// Accepts a bare number (`2.5`, a 0-d array) or a nested array
/// (`[1, 2]`, `[[1.0, 2.0], [3.0, 4.0]]`). Whitespace is ignored.
///
/// # Errors
/// Returns [`AutogradError::Parse`] on malformed input: unexpected end,
/// invalid characters, unparsable numbers, ragged rows, misplaced commas,
/// or trailing characters after the literal.
pub fn parse_tensor(src: &str) -> Result<Ten64> {
    let mut parser = Parser {
        bytes: src.as_bytes(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(AutogradError::Parse("trailing characters"));
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn value(&mut self) -> Result<Ten64> {
        match self.peek() {
            None => Err(AutogradError::Parse("unexpected end of input")),
            Some(b'[') => self.list(),
            Some(b'-' | b'0'..=b'9') => self.number()?.into_tensor(),
            Some(b',') => Err(AutogradError::Parse("comma where value expected")),
            Some(_) => Err(AutogradError::Parse("invalid character")),
        }
    }

    fn list(&mut self) -> Result<Ten64> {
        // consume '['
        self.pos += 1;
        let mut rows = Vec::new();

        if self.peek() == Some(b']') {
            self.pos += 1;
            return stack_rows(rows);
        }

        loop {
            rows.push(self.value()?);
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    if self.peek() == Some(b']') {
                        return Err(AutogradError::Parse("trailing comma"));
                    }
                }
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(AutogradError::Parse("unexpected end of input")),
                Some(_) => return Err(AutogradError::Parse("two values without comma")),
            }
        }

        stack_rows(rows).map_err(|_| AutogradError::Parse("ragged tensor"))
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.bytes.len()
            && matches!(self.bytes[self.pos], b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|text| text.parse::<f64>().ok())
            .ok_or(AutogradError::Parse("bad number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_arrays_stack_outermost_first() {
        let t = [[1.0_f64, 2.0], [3.0, 4.0], [5.0, 6.0]].into_tensor().unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn scalar_is_zero_dimensional() {
        let t = 4.5_f64.into_tensor().unwrap();
        assert_eq!(t.ndim(), 0);
        assert_eq!(t[IxDyn(&[])], 4.5);
    }

    #[test]
    fn ragged_vec_is_rejected() {
        let err = vec![vec![1.0_f64, 2.0], vec![3.0]].into_tensor().unwrap_err();
        assert!(matches!(err, AutogradError::ShapeMismatch { op: "stack", .. }));
    }

    #[test]
    fn empty_vec_has_zero_length() {
        let t = Vec::<f64>::new().into_tensor().unwrap();
        assert_eq!(t.shape(), &[0]);
    }

    #[test]
    fn parse_accepts_whitespace_and_exponents() {
        let t = parse_tensor(" [ [1e0, -2.5] ,[3, 4E1] ] ").unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.iter().copied().collect::<Vec<_>>(), vec![1.0, -2.5, 3.0, 40.0]);
    }

    #[test]
    fn parse_rejects_malformed_literals() {
        let cases = [
            ("[1, 2,]", "trailing comma"),
            ("[1 2]", "two values without comma"),
            ("[[1, 2], [3]]", "ragged tensor"),
            ("[1, 2", "unexpected end of input"),
            ("[1, x]", "invalid character"),
            ("[1--2]", "bad number"),
            ("[1] 2", "trailing characters"),
            ("[,1]", "comma where value expected"),
        ];
        for (src, msg) in cases {
            match parse_tensor(src) {
                Err(AutogradError::Parse(got)) => assert_eq!(got, msg, "input {src:?}"),
                other => panic!("expected parse error for {src:?}, got {other:?}"),
            }
        }
    }
}
