// Spatial hashing grid storing element ids per cell.

use fnv::FnvHasher;

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::Real;
use na::Point3;

#[derive(Copy, Clone, Debug, Default)]
pub struct DeterministicState;

impl BuildHasher for DeterministicState {
    type Hasher = FnvHasher;

    fn build_hasher(&self) -> FnvHasher {
        FnvHasher::with_key(1820)
    }
}

/// A grid based on spacial hashing.
#[derive(PartialEq, Debug, Clone)]
pub struct HGrid<T> {
    cells: HashMap<Point3<i64>, Vec<T>, DeterministicState>,
    origin: Point3<Real>,
    cell_width: Real,
}

impl<T> HGrid<T> {
    /// Initialize a grid where each cell has the width `cell_width`.
    pub fn new(origin: Point3<Real>, cell_width: Real) -> Self {
        Self {
            cells: HashMap::with_hasher(DeterministicState),
            origin,
            cell_width,
        }
    }

    /// The width of a cell of this spacial grid.
    pub fn cell_width(&self) -> Real {
        self.cell_width
    }

    /// The origin of this grid.
    pub fn origin(&self) -> &Point3<Real> {
        &self.origin
    }

    fn quantify(value: Real, cell_width: Real) -> i64 {
        (value / cell_width).floor() as i64
    }

    /// Computes the logical grid cell containing `point`.
    pub fn key(&self, point: &Point3<Real>) -> Point3<i64> {
        Point3::from((point - self.origin).map(|e| Self::quantify(e, self.cell_width)))
    }

    /// Number of non-empty cells.
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Inserts the given `element` into the cell identified by `key`.
    pub fn insert_at(&mut self, key: Point3<i64>, element: T) {
        self.cells.entry(key).or_default().push(element)
    }

    /// Get the content of the logical cell identified by `key`.
    pub fn cell(&self, key: &Point3<i64>) -> Option<&Vec<T>> {
        self.cells.get(key)
    }

    /// The center of the logical cell identified by `cell`.
    pub fn cell_center(&self, cell: &Point3<i64>) -> Point3<Real> {
        self.origin + cell.coords.map(|x| (x as Real + 0.5) * self.cell_width)
    }

    /// An iterator through all the non-empty cells intersecting the given Aabb.
    pub fn cells_intersecting_aabb(
        &self,
        mins: &Point3<Real>,
        maxs: &Point3<Real>,
    ) -> impl Iterator<Item = (Point3<i64>, &Vec<T>)> {
        let cells = &self.cells;
        let start = self.key(mins);
        let end = self.key(maxs);

        CellRangeIterator::new(start, end)
            .filter_map(move |cell| cells.get(&cell).map(|c| (cell, c)))
    }
}

/// Iterates every cell of the box `[start, end]` (inclusive), x varying fastest.
pub struct CellRangeIterator {
    start: Point3<i64>,
    end: Point3<i64>,
    curr: Point3<i64>,
    done: bool,
}

impl CellRangeIterator {
    pub fn new(start: Point3<i64>, end: Point3<i64>) -> Self {
        Self {
            start,
            end,
            curr: start,
            done: (0..3).any(|i| start[i] > end[i]),
        }
    }
}

impl Iterator for CellRangeIterator {
    type Item = Point3<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.curr == self.end {
            self.done = true;
            Some(self.curr)
        } else {
            let result = self.curr;

            for i in 0..3 {
                self.curr[i] += 1;

                if self.curr[i] > self.end[i] {
                    self.curr[i] = self.start[i];
                } else {
                    break;
                }
            }

            Some(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_range_visits_box_once() {
        let cells: Vec<_> =
            CellRangeIterator::new(Point3::new(0, 0, 0), Point3::new(1, 2, 0)).collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], Point3::new(0, 0, 0));
        assert_eq!(cells[1], Point3::new(1, 0, 0));
        assert_eq!(cells[5], Point3::new(1, 2, 0));
    }

    #[test]
    fn empty_range() {
        let mut it = CellRangeIterator::new(Point3::new(1, 0, 0), Point3::new(0, 0, 0));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn keys_are_floored() {
        let grid = HGrid::<usize>::new(Point3::new(-1.0, -1.0, -1.0), 0.5);
        assert_eq!(grid.key(&Point3::new(-1.0, -0.75, 0.0)), Point3::new(0, 0, 2));
        assert_eq!(grid.key(&Point3::new(-1.1, 0.0, 0.0)), Point3::new(-1, 2, 2));
        assert_eq!(grid.cell_center(&Point3::new(0, 0, 2)), Point3::new(-0.75, -0.75, 0.25));
    }
}
