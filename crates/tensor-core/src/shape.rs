// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shape descriptor.

use std::fmt;

/// The (batch, channels, height, width) descriptor of a layer tensor.
///
/// Every layer declares one for its input and one for its output; the
/// batch component is informational and never part of [`tot`](Dims::tot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Dims {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Dims {
    /// Creates a descriptor from all four components.
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    /// Creates a single-batch descriptor.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Dims;
    /// let d = Dims::chw(3, 416, 416);
    /// assert_eq!(d.n, 1);
    /// assert_eq!(d.tot(), 3 * 416 * 416);
    /// ```
    pub fn chw(c: usize, h: usize, w: usize) -> Self {
        Self { n: 1, c, h, w }
    }

    /// Number of elements of one batch item: `c * h * w`.
    pub fn tot(&self) -> usize {
        self.c * self.h * self.w
    }

    /// Same channel/spatial layout with a different batch size.
    pub fn with_batch(self, n: usize) -> Self {
        Self { n, ..self }
    }

    /// True when channels, height and width match (batch ignored).
    pub fn same_chw(&self, other: &Dims) -> bool {
        self.c == other.c && self.h == other.h && self.w == other.w
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {} x {}", self.n, self.c, self.h, self.w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tot_ignores_batch() {
        let d = Dims::new(8, 16, 13, 13);
        assert_eq!(d.tot(), 16 * 13 * 13);
        assert_eq!(d.with_batch(1).tot(), d.tot());
    }

    #[test]
    fn test_display() {
        assert_eq!(Dims::chw(3, 4, 5).to_string(), "1 x 3 x 4 x 5");
    }

    #[test]
    fn test_same_chw() {
        assert!(Dims::new(2, 3, 4, 5).same_chw(&Dims::chw(3, 4, 5)));
        assert!(!Dims::chw(3, 4, 5).same_chw(&Dims::chw(3, 5, 4)));
    }
}
