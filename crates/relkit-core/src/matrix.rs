//! Sparse relationship matrix between two hierarchy levels.

use std::collections::HashMap;
use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{RelkitError, RelkitResult};
use crate::models::{CellValue, LinkState, MatrixCell};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixKind {
    /// Integer weights, default 0.
    Weighted,
    /// None / partial / complete links, default none.
    Tristate,
}

impl MatrixKind {
    pub fn default_value(self) -> CellValue {
        match self {
            MatrixKind::Weighted => CellValue::Weight(0),
            MatrixKind::Tristate => CellValue::Link(LinkState::None),
        }
    }
}

/// An entity contributing one header to the matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeaderEntity {
    pub id: i64,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipMatrix {
    kind: MatrixKind,
    row_headers: IndexMap<i64, String>,
    column_headers: IndexMap<i64, String>,
    cells: HashMap<(i64, i64), CellValue>,
    persisted: HashMap<(i64, i64), CellValue>,
}

impl RelationshipMatrix {
    pub fn new(kind: MatrixKind) -> Self {
        Self {
            kind,
            row_headers: IndexMap::new(),
            column_headers: IndexMap::new(),
            cells: HashMap::new(),
            persisted: HashMap::new(),
        }
    }

    /// Build headers from two entity collections and populate the loaded
    /// cells. Loaded values are treated as already persisted.
    pub fn select_all(
        kind: MatrixKind,
        row_entities: &[HeaderEntity],
        column_entities: &[HeaderEntity],
        cells: &[MatrixCell],
    ) -> RelkitResult<Self> {
        let mut matrix = Self::new(kind);
        for entity in row_entities {
            matrix.insert_row(entity.id, &entity.label)?;
        }
        for entity in column_entities {
            matrix.insert_column(entity.id, &entity.label)?;
        }
        for cell in cells {
            matrix.check_headers(cell.row_id, cell.column_id)?;
            if cell.value != matrix.default_value() {
                matrix.cells.insert((cell.row_id, cell.column_id), cell.value);
            }
        }
        matrix.persisted = matrix.cells.clone();
        debug!(
            "loaded {}x{} matrix with {} non-default cells",
            matrix.row_headers.len(),
            matrix.column_headers.len(),
            matrix.cells.len()
        );
        Ok(matrix)
    }

    pub fn kind(&self) -> MatrixKind {
        self.kind
    }

    pub fn default_value(&self) -> CellValue {
        self.kind.default_value()
    }

    pub fn row_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.row_headers.keys().copied()
    }

    pub fn column_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.column_headers.keys().copied()
    }

    pub fn row_label(&self, id: i64) -> Option<&str> {
        self.row_headers.get(&id).map(String::as_str)
    }

    pub fn column_label(&self, id: i64) -> Option<&str> {
        self.column_headers.get(&id).map(String::as_str)
    }

    fn check_headers(&self, row: i64, column: i64) -> RelkitResult<()> {
        if !self.row_headers.contains_key(&row) {
            return Err(RelkitError::NotFound(format!("matrix row {row}")));
        }
        if !self.column_headers.contains_key(&column) {
            return Err(RelkitError::NotFound(format!("matrix column {column}")));
        }
        Ok(())
    }

    /// Point lookup; a known cell with nothing stored yields the default.
    pub fn select(&self, row: i64, column: i64) -> RelkitResult<CellValue> {
        self.check_headers(row, column)?;
        Ok(self
            .cells
            .get(&(row, column))
            .copied()
            .unwrap_or_else(|| self.default_value()))
    }

    pub fn set(&mut self, row: i64, column: i64, value: CellValue) -> RelkitResult<()> {
        self.check_headers(row, column)?;
        if value == self.default_value() {
            self.cells.remove(&(row, column));
        } else {
            self.cells.insert((row, column), value);
        }
        Ok(())
    }

    pub fn insert_row(&mut self, id: i64, label: &str) -> RelkitResult<()> {
        if self.row_headers.contains_key(&id) {
            return Err(RelkitError::DuplicateKey(format!("matrix row {id}")));
        }
        self.row_headers.insert(id, label.to_string());
        Ok(())
    }

    pub fn insert_column(&mut self, id: i64, label: &str) -> RelkitResult<()> {
        if self.column_headers.contains_key(&id) {
            return Err(RelkitError::DuplicateKey(format!("matrix column {id}")));
        }
        self.column_headers.insert(id, label.to_string());
        Ok(())
    }

    pub fn delete_row(&mut self, id: i64) -> RelkitResult<()> {
        if self.row_headers.shift_remove(&id).is_none() {
            return Err(RelkitError::NotFound(format!("matrix row {id}")));
        }
        self.cells.retain(|(r, _), _| *r != id);
        self.persisted.retain(|(r, _), _| *r != id);
        Ok(())
    }

    pub fn delete_column(&mut self, id: i64) -> RelkitResult<()> {
        if self.column_headers.shift_remove(&id).is_none() {
            return Err(RelkitError::NotFound(format!("matrix column {id}")));
        }
        self.cells.retain(|(_, c), _| *c != id);
        self.persisted.retain(|(_, c), _| *c != id);
        Ok(())
    }

    /// Cells whose value differs from the last persisted snapshot.
    pub fn dirty_cells(&self) -> Vec<MatrixCell> {
        let default = self.default_value();
        let mut dirty = Vec::new();
        for row in self.row_headers.keys() {
            for column in self.column_headers.keys() {
                let key = (*row, *column);
                let current = self.cells.get(&key).copied().unwrap_or(default);
                let saved = self.persisted.get(&key).copied().unwrap_or(default);
                if current != saved {
                    dirty.push(MatrixCell { row_id: *row, column_id: *column, value: current });
                }
            }
        }
        dirty
    }

    /// Persist every changed cell through `persist_fn`. All cells are
    /// attempted; the first failure is returned after the sweep. Only cells
    /// that persisted successfully advance the snapshot.
    pub fn update<F, E>(&mut self, mut persist_fn: F) -> RelkitResult<usize>
    where
        F: FnMut(&MatrixCell) -> Result<(), E>,
        E: Display,
    {
        let mut persisted = 0usize;
        let mut first_error: Option<RelkitError> = None;
        let default = self.default_value();
        for cell in self.dirty_cells() {
            match persist_fn(&cell) {
                Ok(()) => {
                    let key = (cell.row_id, cell.column_id);
                    if cell.value == default {
                        self.persisted.remove(&key);
                    } else {
                        self.persisted.insert(key, cell.value);
                    }
                    persisted += 1;
                }
                Err(e) => {
                    warn!(
                        "failed to persist matrix cell ({}, {}): {}",
                        cell.row_id, cell.column_id, e
                    );
                    if first_error.is_none() {
                        first_error = Some(RelkitError::Persistence(format!(
                            "cell ({}, {}): {}",
                            cell.row_id, cell.column_id, e
                        )));
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(persisted),
        }
    }

    /// Every cell (including defaults) in header order.
    pub fn cells(&self) -> Vec<MatrixCell> {
        let mut out = Vec::with_capacity(self.row_headers.len() * self.column_headers.len());
        for row in self.row_headers.keys() {
            for column in self.column_headers.keys() {
                let value = self
                    .cells
                    .get(&(*row, *column))
                    .copied()
                    .unwrap_or_else(|| self.default_value());
                out.push(MatrixCell { row_id: *row, column_id: *column, value });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities(ids: &[i64], prefix: &str) -> Vec<HeaderEntity> {
        ids.iter()
            .map(|id| HeaderEntity { id: *id, label: format!("{prefix}-{id}") })
            .collect()
    }

    fn loaded() -> RelationshipMatrix {
        RelationshipMatrix::select_all(
            MatrixKind::Weighted,
            &entities(&[1, 2], "F"),
            &entities(&[10, 20, 30], "HW"),
            &[
                MatrixCell { row_id: 1, column_id: 10, value: CellValue::Weight(2) },
                MatrixCell { row_id: 2, column_id: 30, value: CellValue::Weight(1) },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_select_defaults_and_values() {
        let m = loaded();
        assert_eq!(m.select(1, 10).unwrap(), CellValue::Weight(2));
        assert_eq!(m.select(1, 20).unwrap(), CellValue::Weight(0));
        assert_eq!(m.select(9, 10).unwrap_err().code(), "not_found");
        assert_eq!(m.row_label(2), Some("F-2"));
    }

    #[test]
    fn test_tristate_default() {
        let m = RelationshipMatrix::select_all(
            MatrixKind::Tristate,
            &entities(&[1], "R"),
            &entities(&[5], "V"),
            &[],
        )
        .unwrap();
        assert_eq!(m.select(1, 5).unwrap(), CellValue::Link(LinkState::None));
    }

    #[test]
    fn test_duplicate_insert_leaves_matrix_unchanged() {
        let mut m = loaded();
        let before = m.clone();
        assert_eq!(m.insert_row(1, "again").unwrap_err().code(), "duplicate_key");
        assert_eq!(m.insert_column(20, "again").unwrap_err().code(), "duplicate_key");
        assert_eq!(m, before);
    }

    #[test]
    fn test_insert_delete_roundtrip_restores_state() {
        let mut m = loaded();
        let before = m.clone();
        m.insert_row(42, "F-42").unwrap();
        assert_eq!(m.select(42, 10).unwrap(), CellValue::Weight(0));
        m.delete_row(42).unwrap();
        assert_eq!(m, before);
        assert_eq!(m.delete_row(42).unwrap_err().code(), "not_found");
    }

    #[test]
    fn test_delete_column_drops_cells() {
        let mut m = loaded();
        m.delete_column(10).unwrap();
        assert_eq!(m.select(1, 10).unwrap_err().code(), "not_found");
        assert_eq!(m.cells().len(), 4);
    }

    #[test]
    fn test_update_persists_only_changed_cells() {
        let mut m = loaded();
        m.set(1, 20, CellValue::Weight(3)).unwrap();
        m.set(1, 10, CellValue::Weight(0)).unwrap();
        let mut seen = Vec::new();
        let count = m
            .update(|cell: &MatrixCell| -> Result<(), String> {
                seen.push(*cell);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen[0], MatrixCell { row_id: 1, column_id: 10, value: CellValue::Weight(0) });
        assert_eq!(seen[1], MatrixCell { row_id: 1, column_id: 20, value: CellValue::Weight(3) });
        assert!(m.dirty_cells().is_empty());
    }

    #[test]
    fn test_update_is_best_effort() {
        let mut m = loaded();
        m.set(1, 20, CellValue::Weight(3)).unwrap();
        m.set(2, 10, CellValue::Weight(4)).unwrap();
        let mut attempts = 0;
        let err = m
            .update(|cell: &MatrixCell| {
                attempts += 1;
                if cell.row_id == 1 {
                    Err("disk full")
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(attempts, 2);
        assert_eq!(err.code(), "persistence");
        let dirty = m.dirty_cells();
        assert_eq!(dirty.len(), 1);
        assert_eq!((dirty[0].row_id, dirty[0].column_id), (1, 20));
    }
}
