//! Query parameters, rows and results

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// PostgreSQL type OIDs the row converter understands
mod oid {
    pub const BOOL: u32 = 16;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const OID: u32 = 26;
    pub const XID: u32 = 28;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const JSONB: u32 = 3802;
}

/// Query parameter, sent to the server in text format
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// JSON document
    Json(Value),
}

impl Param {
    /// Text encoding of the value, `None` for NULL
    pub fn to_text(&self) -> Option<String> {
        match self {
            Param::Null => None,
            Param::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            Param::Int(i) => Some(i.to_string()),
            Param::Float(f) if f.is_nan() => Some("NaN".to_string()),
            Param::Float(f) if f.is_infinite() => {
                Some(if *f > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
            }
            Param::Float(f) => Some(f.to_string()),
            Param::Text(s) => Some(s.clone()),
            Param::Json(v) => Some(v.to_string()),
        }
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v.into())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::Int(v.into())
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Json(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map_or(Param::Null, Into::into)
    }
}

/// Result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// PostgreSQL type OID (0 when unknown)
    pub type_oid: u32,
}

impl Column {
    /// Create a column
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }
}

/// One result row: ordered column name to text value mapping.
///
/// Serializes as a JSON object whose values are typed from the column OIDs.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Create a row; missing trailing values read as NULL
    pub fn new(columns: Arc<[Column]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Column metadata
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether a column with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Text value by column index; `None` for NULL or out of range
    pub fn get_idx(&self, idx: usize) -> Option<&str> {
        self.values.get(idx)?.as_deref()
    }

    /// Text value by column name; `None` for NULL or a missing column
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_idx(self.position(name)?)
    }

    /// Parse a value with [`FromStr`]; `None` if NULL, missing or unparsable
    pub fn get_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name)?.parse().ok()
    }

    /// Boolean value, accepting PostgreSQL's `t` / `f`
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        parse_bool(self.get(name)?)
    }

    /// Iterate `(column, value)` pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), self.get_idx(i)))
    }

    /// Convert to a JSON object with typed values
    pub fn to_json(&self) -> Value {
        let map = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), typed(c.type_oid, self.get_idx(i))))
            .collect();
        Value::Object(map)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (i, column) in self.columns.iter().enumerate() {
            map.serialize_entry(&column.name, &typed(column.type_oid, self.get_idx(i)))?;
        }
        map.end()
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "t" | "true" => Some(true),
        "f" | "false" => Some(false),
        _ => None,
    }
}

/// Text value to JSON, falling back to a string when the text does not
/// parse as the column type.
fn typed(type_oid: u32, text: Option<&str>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    let parsed = match type_oid {
        oid::BOOL => parse_bool(text).map(Value::Bool),
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID | oid::XID => {
            text.parse::<i64>().ok().map(Value::from)
        }
        oid::FLOAT4 | oid::FLOAT8 => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        oid::JSON | oid::JSONB => serde_json::from_str(text).ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(text.to_string()))
}

/// Full result of one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Result columns (empty for statements without a result set)
    pub columns: Vec<Column>,
    /// Rows in server order
    pub rows: Vec<Row>,
    /// Affected or returned row count, when the statement reports one
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    /// Result with no columns and the given row count
    pub fn command(rows_affected: Option<u64>) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    /// Result set built from text rows; `rows_affected` is the row count
    pub fn rows<I, R>(columns: Vec<Column>, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = Option<String>>,
    {
        let shared: Arc<[Column]> = columns.clone().into();
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|values| Row::new(shared.clone(), values.into_iter().collect()))
            .collect();
        Self {
            columns,
            rows_affected: Some(rows.len() as u64),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Row {
        let columns: Arc<[Column]> = vec![
            Column::new("pid", oid::INT4),
            Column::new("active", oid::BOOL),
            Column::new("load", oid::FLOAT8),
            Column::new("state", 25),
            Column::new("meta", oid::JSONB),
            Column::new("query", 25),
        ]
        .into();
        Row::new(
            columns,
            vec![
                Some("4242".into()),
                Some("t".into()),
                Some("0.5".into()),
                Some("idle".into()),
                Some(r#"{"a":1}"#.into()),
                None,
            ],
        )
    }

    #[test]
    fn test_param_text_encoding() {
        assert_eq!(Param::Null.to_text(), None);
        assert_eq!(Param::from(true).to_text().as_deref(), Some("true"));
        assert_eq!(Param::from(42).to_text().as_deref(), Some("42"));
        assert_eq!(Param::from(1.5).to_text().as_deref(), Some("1.5"));
        assert_eq!(Param::from(f64::NAN).to_text().as_deref(), Some("NaN"));
        assert_eq!(
            Param::from(f64::NEG_INFINITY).to_text().as_deref(),
            Some("-Infinity")
        );
        assert_eq!(Param::from("idle").to_text().as_deref(), Some("idle"));
        assert_eq!(
            Param::from(json!({"k": [1, 2]})).to_text().as_deref(),
            Some(r#"{"k":[1,2]}"#)
        );
        assert_eq!(Param::from(None::<i64>), Param::Null);
        assert_eq!(Param::from(Some("x")), Param::Text("x".into()));
    }

    #[test]
    fn test_row_accessors() {
        let row = sample();
        assert_eq!(row.len(), 6);
        assert_eq!(row.get("state"), Some("idle"));
        assert_eq!(row.get("query"), None);
        assert_eq!(row.get("missing"), None);
        assert!(row.contains("query"));
        assert!(!row.contains("missing"));
        assert_eq!(row.get_as::<i32>("pid"), Some(4242));
        assert_eq!(row.get_as::<i32>("state"), None);
        assert_eq!(row.get_bool("active"), Some(true));
        assert_eq!(row.get_idx(0), Some("4242"));
        assert_eq!(row.get_idx(99), None);

        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["pid", "active", "load", "state", "meta", "query"]);
    }

    #[test]
    fn test_row_to_json_is_typed() {
        assert_eq!(
            sample().to_json(),
            json!({
                "pid": 4242,
                "active": true,
                "load": 0.5,
                "state": "idle",
                "meta": {"a": 1},
                "query": null,
            })
        );
    }

    #[test]
    fn test_row_serialize_matches_to_json() {
        let row = sample();
        assert_eq!(serde_json::to_value(&row).unwrap(), row.to_json());
    }

    #[test]
    fn test_unparsable_typed_value_falls_back_to_string() {
        assert_eq!(typed(oid::INT8, Some("abc")), json!("abc"));
        assert_eq!(typed(oid::FLOAT8, Some("NaN")), json!("NaN"));
        assert_eq!(typed(oid::JSON, Some("{")), json!("{"));
    }

    #[test]
    fn test_query_result_builders() {
        let result = QueryResult::rows(
            vec![Column::new("n", oid::INT4)],
            vec![vec![Some("1".to_string())], vec![Some("2".to_string())]],
        );
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows_affected, Some(2));
        assert_eq!(result.rows[1].get_as::<i64>("n"), Some(2));

        let command = QueryResult::command(Some(3));
        assert!(command.rows.is_empty());
        assert_eq!(command.rows_affected, Some(3));
    }
}
