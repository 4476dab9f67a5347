use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Chessboard geometry: number of *inner* corners along x (`nx`) and y (`ny`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub nx: usize,
    pub ny: usize,
}

impl GridSize {
    pub fn new(nx: usize, ny: usize) -> Self {
        Self { nx, ny }
    }

    #[inline]
    pub fn corner_count(&self) -> usize {
        self.nx * self.ny
    }

    /// A grid needs at least two corners per axis to define a plane.
    pub fn is_valid(&self) -> bool {
        self.nx >= 2 && self.ny >= 2
    }

    /// Row-major index of corner `(i, j)`, `i` along x.
    #[inline]
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    /// Synthetic planar model: integer coordinates, zero depth, `x` varying fastest.
    ///
    /// Point `k` is `(k % nx, k / nx, 0)`; detected corner sets follow the same order.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for j in 0..self.ny {
            for i in 0..self.nx {
                points.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        points
    }
}
