//! Tabular payload stored in every table.
//!
//! A [`Frame`] is an immutable grid of JSON cells with ordered named columns
//! and an ordered row index. It serializes in "split" orientation
//! (`{"columns": [...], "index": [...], "data": [[...], ...]}`), which is
//! also the document layout used by the mapper.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FrameError, ValidationError};
use crate::id::TableId;

/// Row label of a [`Frame`].
///
/// Keys of different variants order by variant first; a well-formed table
/// uses a single variant for its whole index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexKey {
    /// Integer position or numeric label.
    Int(i64),
    /// Calendar date (serialized as `YYYY-MM-DD`).
    Date(NaiveDate),
    /// Free-form label such as a ticker.
    Text(String),
}

impl IndexKey {
    /// Returns the date if this is a date key.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            IndexKey::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the label if this is a text key.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            IndexKey::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Int(i) => write!(f, "{i}"),
            IndexKey::Date(d) => write!(f, "{d}"),
            IndexKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<NaiveDate> for IndexKey {
    fn from(date: NaiveDate) -> Self {
        IndexKey::Date(date)
    }
}

impl From<&str> for IndexKey {
    fn from(label: &str) -> Self {
        IndexKey::Text(label.to_owned())
    }
}

impl From<i64> for IndexKey {
    fn from(i: i64) -> Self {
        IndexKey::Int(i)
    }
}

/// Immutable tabular value: ordered columns, indexed rows of JSON cells.
///
/// Construction checks that the index and every row agree with the column
/// list; ordering and uniqueness of the index are left to the owning table's
/// validation rules.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawFrame")]
pub struct Frame {
    columns: Vec<String>,
    index: Vec<IndexKey>,
    data: Vec<Vec<Value>>,
}

/// Unchecked wire form of a [`Frame`].
#[derive(Deserialize)]
struct RawFrame {
    columns: Vec<String>,
    index: Vec<IndexKey>,
    data: Vec<Vec<Value>>,
}

impl TryFrom<RawFrame> for Frame {
    type Error = FrameError;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        Frame::new(raw.columns, raw.index, raw.data)
    }
}

impl Frame {
    /// Build a frame, checking that all parts agree in shape.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the index length differs from the number of
    /// rows or a row's width differs from the number of columns.
    pub fn new(
        columns: Vec<String>,
        index: Vec<IndexKey>,
        data: Vec<Vec<Value>>,
    ) -> Result<Self, FrameError> {
        if index.len() != data.len() {
            return Err(FrameError::IndexLength {
                index: index.len(),
                rows: data.len(),
            });
        }
        if let Some((row, width)) = data
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, width)| width != columns.len())
        {
            return Err(FrameError::RowWidth {
                row,
                width,
                columns: columns.len(),
            });
        }
        Ok(Self {
            columns,
            index,
            data,
        })
    }

    /// A frame with the given columns and no rows.
    pub fn empty<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            index: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Build a frame from `(key, row)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::RowWidth`] if any row has the wrong width.
    pub fn from_rows<S, K>(
        columns: impl IntoIterator<Item = S>,
        rows: impl IntoIterator<Item = (K, Vec<Value>)>,
    ) -> Result<Self, FrameError>
    where
        S: Into<String>,
        K: Into<IndexKey>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let (index, data) = rows.into_iter().map(|(k, row)| (k.into(), row)).unzip();
        Self::new(columns, index, data)
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row index in order.
    pub fn index(&self) -> &[IndexKey] {
        &self.index
    }

    /// Rows in index order.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.data
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Last row label, if any.
    pub fn last_index(&self) -> Option<&IndexKey> {
        self.index.last()
    }

    /// Position of a column by name.
    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// First row labelled `key`.
    pub fn row(&self, key: &IndexKey) -> Option<&[Value]> {
        self.index
            .iter()
            .position(|k| k == key)
            .map(|pos| self.data[pos].as_slice())
    }

    /// Cell at `key`, `column`.
    pub fn value(&self, key: &IndexKey, column: &str) -> Option<&Value> {
        let col = self.column_position(column)?;
        self.row(key).map(|row| &row[col])
    }

    /// Iterate `(key, row)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &[Value])> {
        self.index.iter().zip(self.data.iter().map(Vec::as_slice))
    }

    /// A copy with `column` appended, one value per row.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::IndexLength`] if `values` has the wrong length.
    pub fn with_column(
        &self,
        column: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<Frame, FrameError> {
        if values.len() != self.len() {
            return Err(FrameError::IndexLength {
                index: self.len(),
                rows: values.len(),
            });
        }
        let mut out = self.clone();
        out.columns.push(column.into());
        for (row, value) in out.data.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(out)
    }

    /// A copy of this frame without its last row.
    pub fn without_last(&self) -> Frame {
        let keep = self.len().saturating_sub(1);
        Frame {
            columns: self.columns.clone(),
            index: self.index[..keep].to_vec(),
            data: self.data[..keep].to_vec(),
        }
    }

    /// Rows of `self` followed by rows of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ColumnMismatch`] if the column lists differ.
    pub fn concat(&self, other: &Frame) -> Result<Frame, FrameError> {
        if self.columns != other.columns {
            return Err(FrameError::ColumnMismatch);
        }
        let mut out = self.clone();
        out.index.extend(other.index.iter().cloned());
        out.data.extend(other.data.iter().cloned());
        Ok(out)
    }

    /// A copy sorted by index; rows with equal keys keep their relative order.
    pub fn sorted_by_index(&self) -> Frame {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| self.index[a].cmp(&self.index[b]));
        Frame {
            columns: self.columns.clone(),
            index: order.iter().map(|&i| self.index[i].clone()).collect(),
            data: order.iter().map(|&i| self.data[i].clone()).collect(),
        }
    }

    /// Collapse runs of equal adjacent keys, keeping the last row of each run.
    pub fn last_per_index(&self) -> Frame {
        let mut index: Vec<IndexKey> = Vec::with_capacity(self.len());
        let mut data: Vec<Vec<Value>> = Vec::with_capacity(self.len());
        for (key, row) in self.index.iter().zip(&self.data) {
            if index.last() == Some(key) {
                if let Some(last) = data.last_mut() {
                    *last = row.clone();
                }
            } else {
                index.push(key.clone());
                data.push(row.clone());
            }
        }
        Frame {
            columns: self.columns.clone(),
            index,
            data,
        }
    }

    /// Check that the index is strictly increasing.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NotIncreasing`] for the first key smaller
    /// than its predecessor, or [`ValidationError::DuplicateIndex`] for the
    /// first key equal to its predecessor.
    pub fn check_unique_increasing(&self, id: &TableId) -> Result<(), ValidationError> {
        for (position, pair) in self.index.windows(2).enumerate() {
            match pair[0].cmp(&pair[1]) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => {
                    return Err(ValidationError::DuplicateIndex {
                        id: id.clone(),
                        key: pair[1].to_string(),
                    });
                }
                std::cmp::Ordering::Greater => {
                    return Err(ValidationError::NotIncreasing {
                        id: id.clone(),
                        position: position + 1,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Check that `new` preserves every value of `old`.
///
/// Rows are realigned by index key: every key of `old` must be present in
/// `new`, and each cell of every `old` column must be equal.
///
/// # Errors
///
/// Returns [`ValidationError::HistoryMismatch`] naming the first differing
/// key and column.
pub fn check_history(
    id: &TableId,
    old: Option<&Frame>,
    new: &Frame,
) -> Result<(), ValidationError> {
    let Some(old) = old else {
        return Ok(());
    };
    let positions: HashMap<&IndexKey, usize> =
        new.index.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mismatch = |key: &IndexKey, column: &str| ValidationError::HistoryMismatch {
        id: id.clone(),
        key: key.to_string(),
        column: column.to_owned(),
    };

    for (key, old_row) in old.iter() {
        let Some(&pos) = positions.get(key) else {
            let column = old.columns.first().map(String::as_str).unwrap_or("");
            return Err(mismatch(key, column));
        };
        for (old_col, column) in old.columns.iter().enumerate() {
            let Some(new_col) = new.column_position(column) else {
                return Err(mismatch(key, column));
            };
            if new.data[pos][new_col] != old_row[old_col] {
                return Err(mismatch(key, column));
            }
        }
    }
    Ok(())
}

/// Merge an incremental download into the previous payload.
///
/// The first download is taken as-is. An empty download keeps the previous
/// payload. Otherwise the download starts at the previous last row, which
/// is dropped before the download is appended.
///
/// # Errors
///
/// Returns [`FrameError::ColumnMismatch`] if the download has other columns.
pub fn merge_incremental(old: Option<&Frame>, fresh: Frame) -> Result<Frame, FrameError> {
    match old {
        None => Ok(fresh),
        Some(old) if fresh.is_empty() => Ok(old.clone()),
        Some(old) => old.without_last().concat(&fresh),
    }
}
