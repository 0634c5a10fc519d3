use rand::Rng;
use serde::{Deserialize, Serialize};

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    /// Uniform(-bound, bound) initialisation, the same scheme torch uses for
    /// recurrent and linear layers (bound = 1/sqrt(fan)).
    pub fn uniform<R: Rng>(rows: usize, cols: usize, bound: f64, rng: &mut R) -> Self {
        let data = (0..rows * cols)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        Self { rows, cols, data }
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// out += A * x
    pub fn matvec_add(&self, x: &[f64], out: &mut [f64]) {
        debug_assert_eq!(x.len(), self.cols);
        debug_assert_eq!(out.len(), self.rows);
        for (r, o) in out.iter_mut().enumerate() {
            *o += dot(self.row(r), x);
        }
    }

    /// out += A^T * y
    pub fn matvec_transposed_add(&self, y: &[f64], out: &mut [f64]) {
        debug_assert_eq!(y.len(), self.rows);
        debug_assert_eq!(out.len(), self.cols);
        for (r, &yr) in y.iter().enumerate() {
            if yr == 0.0 {
                continue;
            }
            for (o, &a) in out.iter_mut().zip(self.row(r)) {
                *o += a * yr;
            }
        }
    }

    /// out += A[:, col], i.e. A times a one-hot vector.
    pub fn add_column(&self, col: usize, out: &mut [f64]) {
        debug_assert!(col < self.cols);
        for (r, o) in out.iter_mut().enumerate() {
            *o += self.data[r * self.cols + col];
        }
    }

    /// A += u * v^T
    pub fn add_outer(&mut self, u: &[f64], v: &[f64]) {
        debug_assert_eq!(u.len(), self.rows);
        debug_assert_eq!(v.len(), self.cols);
        let cols = self.cols;
        for (r, &ur) in u.iter().enumerate() {
            if ur == 0.0 {
                continue;
            }
            let row = &mut self.data[r * cols..(r + 1) * cols];
            for (a, &vc) in row.iter_mut().zip(v) {
                *a += ur * vc;
            }
        }
    }

    /// A[:, col] += u
    pub fn add_to_column(&mut self, col: usize, u: &[f64]) {
        debug_assert_eq!(u.len(), self.rows);
        for (r, &ur) in u.iter().enumerate() {
            self.data[r * self.cols + col] += ur;
        }
    }
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// a += b
pub fn add_assign(a: &mut [f64], b: &[f64]) {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
}

pub fn scale(a: &mut [f64], factor: f64) {
    for x in a.iter_mut() {
        *x *= factor;
    }
}

pub fn squared_norm(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Matrix {
        // [[1, 2, 3],
        //  [4, 5, 6]]
        Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn matvec_and_transpose() {
        let m = sample();
        let mut out = vec![0.0; 2];
        m.matvec_add(&[1.0, 0.0, -1.0], &mut out);
        assert_eq!(out, vec![-2.0, -2.0]);

        let mut out_t = vec![0.0; 3];
        m.matvec_transposed_add(&[1.0, 1.0], &mut out_t);
        assert_eq!(out_t, vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn column_ops_match_one_hot_product() {
        let m = sample();
        let mut via_col = vec![0.0; 2];
        m.add_column(1, &mut via_col);
        let mut via_matvec = vec![0.0; 2];
        m.matvec_add(&[0.0, 1.0, 0.0], &mut via_matvec);
        assert_eq!(via_col, via_matvec);

        let mut g = Matrix::zeros(2, 3);
        g.add_to_column(2, &[1.0, -1.0]);
        let mut h = Matrix::zeros(2, 3);
        h.add_outer(&[1.0, -1.0], &[0.0, 0.0, 1.0]);
        assert_eq!(g, h);
    }

    #[test]
    fn from_vec_rejects_bad_shape() {
        assert!(Matrix::from_vec(2, 2, vec![0.0; 3]).is_none());
    }
}
