//! 型付きスキーマを持つ順序付きテーブル
//!
//! 行の位置（1 始まり）がそのままオブジェクト ID になる。

mod io;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use io::{TableWriter, read_schema, read_table, write_table, write_table_in_existing_dir};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {source}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: missing schema header line", path.display())]
    MissingHeader { path: PathBuf },

    #[error("row has {found} values but schema has {expected} fields")]
    RowWidth { expected: usize, found: usize },

    #[error("field '{field}' not found in {table}")]
    MissingField { table: String, field: String },
}

/// フィールドの型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "String")]
    Text,
    SmallInteger,
    Integer,
    Single,
    Double,
    Date,
    #[serde(rename = "OID")]
    Oid,
    Geometry,
}

impl FieldType {
    pub fn is_integer(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::SmallInteger)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, FieldType::Double | FieldType::Single)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 名前（大文字小文字を区別）でフィールド位置を引く
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// 最初のジオメトリ列
    pub fn geometry_index(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.field_type == FieldType::Geometry)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Row) -> Result<(), TableError> {
        if row.len() != self.schema.len() {
            return Err(TableError::RowWidth {
                expected: self.schema.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 必須フィールドの位置。無ければ `MissingField`。
    pub fn require_field(&self, table: &str, name: &str) -> Result<usize, TableError> {
        self.schema.index_of(name).ok_or_else(|| TableError::MissingField {
            table: table.to_string(),
            field: name.to_string(),
        })
    }

    /// 列を末尾に追加する。`values` は行数と同じ長さであること。
    pub fn append_column(&mut self, field: Field, values: Vec<Value>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::RowWidth {
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.schema.fields.push(field);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }
}

/// ID 値を等価比較用のキーに正規化する。null は ID として扱わない。
///
/// 文字列と数値は別のキーになる（`"5"` と `5` は一致しない）。
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("s:{s}")),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(format!("n:{i}")),
            None => n.as_f64().map(|f| {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    format!("n:{}", f as i64)
                } else {
                    format!("n:{f}")
                }
            }),
        },
        other => Some(format!("j:{other}")),
    }
}

/// ルート名などに埋め込む ID の表示形（文字列は引用符なし）
pub fn id_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
