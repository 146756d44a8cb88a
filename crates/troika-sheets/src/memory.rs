//! In-memory [`SheetsApi`] implementation.
//!
//! Backs the test suites of every crate that talks to sheets. Supports
//! scripted failure injection so retry, breaker and cache behavior can be
//! exercised without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{ApiError, CellUpdate, Row, SheetsApi};
use crate::color::Color;

#[derive(Default)]
struct SheetData {
    rows: Vec<Vec<String>>,
    formats: HashMap<(u32, u32), Color>,
}

/// Thread-safe in-memory spreadsheet document.
#[derive(Default)]
pub struct InMemorySheets {
    sheets: Mutex<HashMap<String, SheetData>>,
    scripted_failures: Mutex<VecDeque<ApiError>>,
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemorySheets {
    /// An empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a worksheet's contents.
    pub fn seed(&self, sheet: &str, rows: Vec<Vec<String>>) {
        if let Ok(mut guard) = self.sheets.lock() {
            guard.entry(sheet.to_string()).or_default().rows = rows;
        }
    }

    /// Queue `count` copies of `error`; subsequent calls consume them
    /// before touching data.
    pub fn fail_next(&self, count: usize, error: ApiError) {
        if let Ok(mut guard) = self.scripted_failures.lock() {
            for _ in 0..count {
                guard.push_back(error.clone());
            }
        }
    }

    /// Total API calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Single-cell writes made.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current fill color of a cell, if any.
    #[must_use]
    pub fn format_of(&self, sheet: &str, row: u32, col: u32) -> Option<Color> {
        self.sheets
            .lock()
            .ok()?
            .get(sheet)?
            .formats
            .get(&(row, col))
            .copied()
    }

    /// Snapshot of a worksheet's rows.
    #[must_use]
    pub fn rows_of(&self, sheet: &str) -> Vec<Vec<String>> {
        self.sheets
            .lock()
            .ok()
            .and_then(|guard| guard.get(sheet).map(|d| d.rows.clone()))
            .unwrap_or_default()
    }

    fn enter(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.scripted_failures.lock() {
            if let Some(error) = guard.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn with_sheet<T>(
        &self,
        sheet: &str,
        f: impl FnOnce(&mut SheetData) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut guard = self
            .sheets
            .lock()
            .map_err(|_| ApiError::Invalid("poisoned".to_string()))?;
        let data = guard
            .get_mut(sheet)
            .ok_or_else(|| ApiError::NotFound(format!("worksheet {sheet}")))?;
        f(data)
    }
}

#[allow(clippy::cast_possible_truncation)]
impl SheetsApi for InMemorySheets {
    fn list_rows(&self, sheet: &str) -> Result<Vec<Row>, ApiError> {
        self.enter()?;
        self.with_sheet(sheet, |data| {
            Ok(data
                .rows
                .iter()
                .enumerate()
                .map(|(i, cells)| Row {
                    index: (i as u32).saturating_add(1),
                    cells: cells.clone(),
                })
                .collect())
        })
    }

    fn read_cell(&self, sheet: &str, row: u32, col: u32) -> Result<String, ApiError> {
        self.enter()?;
        self.with_sheet(sheet, |data| {
            let r = (row as usize)
                .checked_sub(1)
                .ok_or_else(|| ApiError::Invalid("row 0".to_string()))?;
            let c = (col as usize)
                .checked_sub(1)
                .ok_or_else(|| ApiError::Invalid("col 0".to_string()))?;
            data.rows
                .get(r)
                .ok_or_else(|| ApiError::NotFound(format!("row {row}")))
                .map(|cells| cells.get(c).cloned().unwrap_or_default())
        })
    }

    fn write_cell(&self, sheet: &str, row: u32, col: u32, value: &str) -> Result<(), ApiError> {
        self.enter()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.with_sheet(sheet, |data| {
            write_into(data, row, col, value);
            Ok(())
        })
    }

    fn batch_update(&self, sheet: &str, updates: &[CellUpdate]) -> Result<(), ApiError> {
        self.enter()?;
        self.with_sheet(sheet, |data| {
            for update in updates {
                write_into(data, update.row, update.col, &update.value);
            }
            Ok(())
        })
    }

    fn append_row(&self, sheet: &str, values: &[String]) -> Result<u32, ApiError> {
        self.enter()?;
        self.with_sheet(sheet, |data| {
            data.rows.push(values.to_vec());
            Ok(data.rows.len() as u32)
        })
    }

    fn format_cell(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        color: Option<Color>,
    ) -> Result<(), ApiError> {
        self.enter()?;
        self.with_sheet(sheet, |data| {
            match color {
                Some(c) => {
                    data.formats.insert((row, col), c);
                },
                None => {
                    data.formats.remove(&(row, col));
                },
            }
            Ok(())
        })
    }
}

/// Grow the grid as needed and set one cell.
#[allow(clippy::cast_possible_truncation)]
fn write_into(data: &mut SheetData, row: u32, col: u32, value: &str) {
    let r = (row as usize).saturating_sub(1);
    let c = (col as usize).saturating_sub(1);
    while data.rows.len() <= r {
        data.rows.push(Vec::new());
    }
    let cells = &mut data.rows[r];
    while cells.len() <= c {
        cells.push(String::new());
    }
    cells[c] = value.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_and_list() {
        let api = InMemorySheets::new();
        api.seed("S", vec![vec!["a".into(), "b".into()]]);
        let rows = api.list_rows("S").unwrap();
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].cell(1), "b");
    }

    #[test]
    fn missing_worksheet_not_found() {
        let api = InMemorySheets::new();
        assert!(matches!(
            api.list_rows("nope"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn write_grows_grid() {
        let api = InMemorySheets::new();
        api.seed("S", vec![]);
        api.write_cell("S", 3, 2, "x").unwrap();
        assert_eq!(api.read_cell("S", 3, 2).unwrap(), "x");
        assert_eq!(api.read_cell("S", 3, 1).unwrap(), "");
    }

    #[test]
    fn append_returns_index() {
        let api = InMemorySheets::new();
        api.seed("S", vec![vec!["header".into()]]);
        let idx = api.append_row("S", &["r".to_string()]).unwrap();
        assert_eq!(idx, 2);
    }

    #[test]
    fn scripted_failures_consumed_in_order() {
        let api = InMemorySheets::new();
        api.seed("S", vec![]);
        api.fail_next(1, ApiError::RateLimited);
        assert!(matches!(api.list_rows("S"), Err(ApiError::RateLimited)));
        assert!(api.list_rows("S").is_ok());
    }

    #[test]
    fn formats_set_and_cleared() {
        let api = InMemorySheets::new();
        api.seed("S", vec![vec!["a".into()]]);
        api.format_cell("S", 1, 1, Some(Color::WARM_PINK)).unwrap();
        assert_eq!(api.format_of("S", 1, 1), Some(Color::WARM_PINK));
        api.format_cell("S", 1, 1, None).unwrap();
        assert_eq!(api.format_of("S", 1, 1), None);
    }

    #[test]
    fn batch_update_applies_all() {
        let api = InMemorySheets::new();
        api.seed("S", vec![]);
        api.batch_update(
            "S",
            &[
                CellUpdate {
                    row: 1,
                    col: 1,
                    value: "a".into(),
                },
                CellUpdate {
                    row: 2,
                    col: 3,
                    value: "b".into(),
                },
            ],
        )
        .unwrap();
        assert_eq!(api.read_cell("S", 2, 3).unwrap(), "b");
    }
}
