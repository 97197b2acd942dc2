//! Boolean step grid

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A single grid position. Column is the time step, row is the pitch index
/// (row 0 is the highest pitch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub column: usize,
    pub row: usize,
}

impl Cell {
    pub fn new(column: usize, row: usize) -> Self {
        Self { column, row }
    }
}

/// Fixed-size `width x height` matrix of on/off cells, stored row-major.
///
/// Dimensions never change after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<bool>,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::ZeroDimension { width, height });
        }
        Ok(Self {
            width,
            height,
            cells: vec![false; width * height],
        })
    }

    /// All-off grid with the same dimensions
    pub fn blank(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            cells: vec![false; self.cells.len()],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|&on| on)
    }

    pub fn contains(&self, column: usize, row: usize) -> bool {
        column < self.width && row < self.height
    }

    /// Row-major flat index, or None when out of range
    pub fn index_of(&self, column: usize, row: usize) -> Option<usize> {
        self.contains(column, row).then(|| row * self.width + column)
    }

    /// Out-of-range positions read as off
    pub fn get(&self, column: usize, row: usize) -> bool {
        self.index_of(column, row)
            .map(|i| self.cells[i])
            .unwrap_or(false)
    }

    /// Set a cell, returning its previous value. Out-of-range writes are ignored.
    pub fn set(&mut self, column: usize, row: usize, on: bool) -> Option<bool> {
        let i = self.index_of(column, row)?;
        Some(std::mem::replace(&mut self.cells[i], on))
    }

    pub fn clear(&mut self) {
        self.cells.fill(false);
    }

    /// Number of lit cells in a column
    pub fn column_count(&self, column: usize) -> usize {
        (0..self.height).filter(|&row| self.get(column, row)).count()
    }

    /// Lit cells in row-major order
    pub fn active_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
    }

    /// Row-major view of the raw cells
    pub fn as_slice(&self) -> &[bool] {
        &self.cells
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [bool] {
        &mut self.cells
    }
}
