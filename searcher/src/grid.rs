//! Contiguous Multi-Dimensional Buffers
//!
//! The correlation tensors have shapes that are only known at run time
//! (capture length by frequency-search-set size). They are stored as a
//! single allocation with explicit strides so the hot loops stay on one
//! cache-friendly buffer instead of chasing nested vectors.

/// Dense 3-D array over `T` with a caller-chosen axis order.
#[derive(Debug, Clone)]
pub struct Arr3<T> {
    data: Vec<T>,
    shape: (usize, usize, usize),
    strides: (usize, usize, usize),
}

impl<T: Copy + Default> Arr3<T> {
    /// Row-major layout: the last axis is contiguous
    pub fn new(d0: usize, d1: usize, d2: usize) -> Self {
        Self {
            data: vec![T::default(); d0 * d1 * d2],
            shape: (d0, d1, d2),
            strides: (d1 * d2, d2, 1),
        }
    }

    /// Layout with the middle axis contiguous: index (i, j, k) maps to
    /// `i*d2*d1 + k*d1 + j`. Used for `xc` so that one (PSS, frequency)
    /// correlation lane is a contiguous slab a worker can own exclusively.
    pub fn new_mid_contiguous(d0: usize, d1: usize, d2: usize) -> Self {
        Self {
            data: vec![T::default(); d0 * d1 * d2],
            shape: (d0, d1, d2),
            strides: (d1 * d2, 1, d1),
        }
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    #[inline]
    fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.shape.0 && j < self.shape.1 && k < self.shape.2);
        i * self.strides.0 + j * self.strides.1 + k * self.strides.2
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> T {
        self.data[self.offset(i, j, k)]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut T {
        let off = self.offset(i, j, k);
        &mut self.data[off]
    }

    /// Mutable view of the whole backing buffer, for sharded fills
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Dense row-major 2-D array
#[derive(Debug, Clone)]
pub struct Arr2<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Copy + Default> Arr2<T> {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![T::default(); rows * cols],
            rows,
            cols,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn at(&self, r: usize, c: usize) -> T {
        debug_assert!(r < self.rows && c < self.cols);
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn at_mut(&mut self, r: usize, c: usize) -> &mut T {
        debug_assert!(r < self.rows && c < self.cols);
        &mut self.data[r * self.cols + c]
    }

    pub fn row(&self, r: usize) -> &[T] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [T] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arr3_row_major_round_trip() {
        let mut a: Arr3<f64> = Arr3::new(2, 3, 4);
        *a.at_mut(1, 2, 3) = 42.0;
        *a.at_mut(0, 0, 0) = -1.0;
        assert_eq!(a.at(1, 2, 3), 42.0);
        assert_eq!(a.at(0, 0, 0), -1.0);
        assert_eq!(a.at(1, 2, 2), 0.0);
    }

    #[test]
    fn test_arr3_mid_contiguous_layout() {
        let mut a: Arr3<u32> = Arr3::new_mid_contiguous(2, 5, 3);
        for i in 0..2 {
            for j in 0..5 {
                for k in 0..3 {
                    *a.at_mut(i, j, k) = (100 * i + 10 * j + k) as u32;
                }
            }
        }
        // Lane (i=1, k=2) occupies a contiguous run over j
        let base = 1 * 15 + 2 * 5;
        for j in 0..5 {
            assert_eq!(a.data_mut()[base + j], (100 + 10 * j + 2) as u32);
        }
        assert_eq!(a.at(1, 4, 2), 142);
    }

    #[test]
    fn test_arr2() {
        let mut a: Arr2<i32> = Arr2::new(3, 2);
        *a.at_mut(2, 1) = 7;
        assert_eq!(a.row(2), &[0, 7]);
        assert_eq!(a.at(2, 1), 7);
    }
}
