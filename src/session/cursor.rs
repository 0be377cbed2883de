//! Result of the last `execute`, consumed by the fetch calls

use crate::driver::{Column, QueryResult, Row};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct Cursor {
    columns: Vec<Column>,
    rows: VecDeque<Row>,
}

impl Cursor {
    pub(crate) fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn fetch_one(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    pub(crate) fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }
}

impl From<QueryResult> for Cursor {
    fn from(result: QueryResult) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_one_then_all() {
        let result = QueryResult::rows(
            vec![Column::new("n", 23)],
            (1..=3).map(|i| vec![Some(i.to_string())]),
        );
        let mut cursor = Cursor::from(result);
        assert_eq!(cursor.columns()[0].name, "n");
        assert_eq!(cursor.fetch_one().and_then(|r| r.get_as::<i32>("n")), Some(1));

        let rest: Vec<i32> = cursor
            .fetch_all()
            .iter()
            .filter_map(|r| r.get_as("n"))
            .collect();
        assert_eq!(rest, [2, 3]);
        assert!(cursor.fetch_one().is_none());
        assert!(cursor.fetch_all().is_empty());
    }
}
