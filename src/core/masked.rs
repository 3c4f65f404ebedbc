//! Masked raster grid: a plain numeric grid paired with a validity bitmap.
//!
//! Every operation propagates validity explicitly. A cell whose result is not
//! finite (division by zero, sqrt of a negative) becomes invalid instead of
//! leaking NaN or infinity into later reductions.
//!
//! Methods that combine a grid with another grid or mask check shapes and
//! return `RangesatError::Processing` on a mismatch. The arithmetic operators
//! panic instead, as ndarray's own operators do.

use crate::types::{BoolGrid, RangesatError, RangesatResult, Raster};
use ndarray::{s, Array2, Zip};
use std::ops::{Add, Div, Mul, Sub};

#[derive(Debug, Clone, PartialEq)]
pub struct MaskedGrid {
    values: Raster,
    valid: BoolGrid,
}

fn check_shape(expected: (usize, usize), got: (usize, usize), what: &str) -> RangesatResult<()> {
    if expected != got {
        return Err(RangesatError::Processing(format!(
            "{} shape {:?} does not match grid {:?}",
            what, got, expected
        )));
    }
    Ok(())
}

impl MaskedGrid {
    /// Pair a value grid with a validity bitmap of the same shape
    pub fn new(values: Raster, valid: BoolGrid) -> RangesatResult<Self> {
        if values.dim() != valid.dim() {
            return Err(RangesatError::Processing(format!(
                "Validity bitmap shape {:?} does not match value grid {:?}",
                valid.dim(),
                values.dim()
            )));
        }
        let valid = Zip::from(&valid)
            .and(&values)
            .map_collect(|&ok, &v| ok && v.is_finite());
        Ok(Self { values, valid })
    }

    /// Every finite cell is valid
    pub fn from_values(values: Raster) -> Self {
        let valid = values.mapv(f64::is_finite);
        Self { values, valid }
    }

    /// Cells equal to `nodata` are invalid
    pub fn with_nodata(values: Raster, nodata: Option<f64>) -> Self {
        let valid = match nodata {
            Some(nd) => values.mapv(|v| v.is_finite() && v != nd),
            None => values.mapv(f64::is_finite),
        };
        Self { values, valid }
    }

    pub fn constant(shape: (usize, usize), value: f64) -> Self {
        Self::from_values(Array2::from_elem(shape, value))
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Raster {
        &self.values
    }

    pub fn valid(&self) -> &BoolGrid {
        &self.valid
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid[[row, col]]
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if self.valid[[row, col]] {
            Some(self.values[[row, col]])
        } else {
            None
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Invalidate every cell where `invalid` is true
    pub fn mask_where(&self, invalid: &BoolGrid) -> RangesatResult<Self> {
        check_shape(self.dim(), invalid.dim(), "Mask")?;
        let valid = Zip::from(&self.valid)
            .and(invalid)
            .map_collect(|&ok, &bad| ok && !bad);
        Ok(Self { values: self.values.clone(), valid })
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let values = self.values.mapv(|v| f(v));
        let valid = Zip::from(&self.valid)
            .and(&values)
            .map_collect(|&ok, &v| ok && v.is_finite());
        Self { values, valid }
    }

    /// Cell-wise combination; valid where both inputs are valid and the result is finite
    pub fn zip_with<F>(&self, other: &MaskedGrid, f: F) -> RangesatResult<Self>
    where
        F: Fn(f64, f64) -> f64,
    {
        check_shape(self.dim(), other.dim(), "Operand")?;
        Ok(self.zip_unchecked(other, f))
    }

    fn zip_unchecked<F>(&self, other: &MaskedGrid, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64,
    {
        let values = Zip::from(&self.values)
            .and(&other.values)
            .map_collect(|&a, &b| f(a, b));
        let valid = Zip::from(&self.valid)
            .and(&other.valid)
            .and(&values)
            .map_collect(|&va, &vb, &v| va && vb && v.is_finite());
        Self { values, valid }
    }

    pub fn abs(&self) -> Self {
        self.map(f64::abs)
    }

    pub fn sqrt(&self) -> Self {
        self.map(f64::sqrt)
    }

    /// Lower clip; invalid cells stay invalid
    pub fn clip_min(&self, min: f64) -> Self {
        self.map(|v| v.max(min))
    }

    /// Boolean grid, true where the cell is valid and strictly above `threshold`
    pub fn gt(&self, threshold: f64) -> BoolGrid {
        Zip::from(&self.values)
            .and(&self.valid)
            .map_collect(|&v, &ok| ok && v > threshold)
    }

    /// Keep values where `keep` is true and replace the rest with `fill`.
    /// Validity is unchanged.
    pub fn keep_where(&self, keep: &BoolGrid, fill: f64) -> RangesatResult<Self> {
        check_shape(self.dim(), keep.dim(), "Mask")?;
        let values = Zip::from(&self.values)
            .and(keep)
            .map_collect(|&v, &k| if k { v } else { fill });
        Ok(Self { values, valid: self.valid.clone() })
    }

    /// Round valid cells to the nearest integer
    pub fn round(&self) -> Self {
        self.map(f64::round)
    }

    /// Dense grid with invalid cells replaced by `fill`
    pub fn filled(&self, fill: f64) -> Raster {
        Zip::from(&self.values)
            .and(&self.valid)
            .map_collect(|&v, &ok| if ok { v } else { fill })
    }

    /// Valid values inside `region`, in row-major order
    pub fn values_in(&self, region: &BoolGrid) -> RangesatResult<Vec<f64>> {
        check_shape(self.dim(), region.dim(), "Region")?;
        let mut out = Vec::new();
        Zip::from(&self.values)
            .and(&self.valid)
            .and(region)
            .for_each(|&v, &ok, &inside| {
                if ok && inside {
                    out.push(v);
                }
            });
        Ok(out)
    }

    /// Sub-grid copy
    pub fn crop(&self, row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        let window = s![row_off..row_off + rows, col_off..col_off + cols];
        Self {
            values: self.values.slice(window).to_owned(),
            valid: self.valid.slice(window).to_owned(),
        }
    }
}

macro_rules! masked_binary_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl<'a, 'b> $trait<&'b MaskedGrid> for &'a MaskedGrid {
            type Output = MaskedGrid;

            fn $method(self, rhs: &'b MaskedGrid) -> MaskedGrid {
                self.zip_unchecked(rhs, |a, b| a $op b)
            }
        }

        impl<'a> $trait<f64> for &'a MaskedGrid {
            type Output = MaskedGrid;

            fn $method(self, rhs: f64) -> MaskedGrid {
                self.map(|a| a $op rhs)
            }
        }

        impl<'a> $trait<&'a MaskedGrid> for f64 {
            type Output = MaskedGrid;

            fn $method(self, rhs: &'a MaskedGrid) -> MaskedGrid {
                rhs.map(|b| self $op b)
            }
        }
    };
}

masked_binary_op!(Add, add, +);
masked_binary_op!(Sub, sub, -);
masked_binary_op!(Mul, mul, *);
// x / 0 yields a non-finite value, which the op marks invalid
masked_binary_op!(Div, div, /);

/// Count of cells true in both grids
pub fn count_both(a: &BoolGrid, b: &BoolGrid) -> RangesatResult<usize> {
    check_shape(a.dim(), b.dim(), "Mask")?;
    Ok(a.iter().zip(b.iter()).filter(|&(&x, &y)| x && y).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_division_by_zero_is_masked() {
        let num = MaskedGrid::from_values(array![[1.0, 0.0], [2.0, 3.0]]);
        let den = MaskedGrid::from_values(array![[0.0, 0.0], [4.0, 1.0]]);

        let ratio = &num / &den;
        assert!(!ratio.is_valid(0, 0));
        assert!(!ratio.is_valid(0, 1));
        assert_eq!(ratio.get(1, 0), Some(0.5));
        assert_eq!(ratio.get(1, 1), Some(3.0));
        assert_eq!(ratio.valid_count(), 2);
    }

    #[test]
    fn test_validity_propagates_through_arithmetic() {
        let a = MaskedGrid::with_nodata(array![[1.0, -9999.0], [2.0, 3.0]], Some(-9999.0));
        let b = MaskedGrid::from_values(array![[1.0, 1.0], [1.0, 1.0]]);

        let sum = &(&a + &b) * 2.0;
        assert_eq!(sum.get(0, 0), Some(4.0));
        assert_eq!(sum.get(0, 1), None);
        assert_eq!(sum.filled(-1.0), array![[4.0, -1.0], [6.0, 8.0]]);
    }

    #[test]
    fn test_values_in_region_skips_invalid() {
        let grid = MaskedGrid::with_nodata(array![[1.0, 2.0], [-9999.0, 4.0]], Some(-9999.0));
        let region = array![[true, false], [true, true]];
        assert_eq!(grid.values_in(&region).unwrap(), vec![1.0, 4.0]);
    }

    #[test]
    fn test_threshold_ignores_invalid_cells() {
        let grid = MaskedGrid::with_nodata(array![[0.5, 0.9], [0.1, -9999.0]], Some(-9999.0))
            .mask_where(&array![[false, true], [false, false]])
            .unwrap();
        assert_eq!(grid.gt(0.3), array![[true, false], [false, false]]);
    }

    #[test]
    fn test_count_both() {
        let a = array![[true, false], [true, false]];
        assert_eq!(count_both(&a, &array![[true, true], [false, true]]).unwrap(), 1);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let grid = MaskedGrid::constant((2, 2), 1.0);
        let mask = Array2::from_elem((3, 2), false);
        let other = MaskedGrid::constant((2, 3), 1.0);

        assert!(matches!(grid.mask_where(&mask), Err(RangesatError::Processing(_))));
        assert!(matches!(grid.keep_where(&mask, 0.0), Err(RangesatError::Processing(_))));
        assert!(matches!(grid.values_in(&mask), Err(RangesatError::Processing(_))));
        assert!(matches!(grid.zip_with(&other, |a, b| a + b), Err(RangesatError::Processing(_))));
        assert!(matches!(count_both(grid.valid(), &mask), Err(RangesatError::Processing(_))));

        let sum = grid.zip_with(&grid, |a, b| a + b).unwrap();
        assert_eq!(sum.get(1, 1), Some(2.0));
    }
}
