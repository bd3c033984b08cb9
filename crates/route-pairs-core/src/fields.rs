//! ソルバの Stops 入力にそのまま渡せるフィールドの検出

use serde::Serialize;

use crate::table::{FieldType, Schema};

/// 受理する型の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accepts {
    Text,
    Numeric,
    Integer,
    Date,
}

impl Accepts {
    fn matches(self, t: FieldType) -> bool {
        match self {
            Accepts::Text => t == FieldType::Text,
            Accepts::Numeric => t.is_numeric(),
            Accepts::Integer => t.is_integer(),
            Accepts::Date => t == FieldType::Date,
        }
    }
}

/// Stops が認識するフィールド名と型。
///
/// RouteName / Sequence はこのツールが明示的に制御し、LocationType は
/// 全入力を Stop として扱うため、いずれも転送しない。
const STOPS_INPUT_FIELDS: &[(&str, Accepts)] = &[
    ("Name", Accepts::Text),
    ("AdditionalTime", Accepts::Numeric),
    ("AdditionalDistance", Accepts::Numeric),
    ("AdditionalCost", Accepts::Numeric),
    ("TimeWindowStart", Accepts::Date),
    ("TimeWindowEnd", Accepts::Date),
    ("CurbApproach", Accepts::Integer),
    ("Bearing", Accepts::Numeric),
    ("BearingTol", Accepts::Numeric),
    ("NavLatency", Accepts::Numeric),
    ("SourceID", Accepts::Integer),
    ("SourceOID", Accepts::Integer),
    ("PosAlong", Accepts::Numeric),
    ("SideOfEdge", Accepts::Integer),
];

/// 許可リストと名前・型の両方が一致するフィールド名を、スキーマの順で返す
pub fn supported_stop_fields(schema: &Schema) -> Vec<String> {
    schema
        .fields
        .iter()
        .filter(|f| {
            STOPS_INPUT_FIELDS
                .iter()
                .any(|(name, accepts)| *name == f.name && accepts.matches(f.field_type))
        })
        .map(|f| f.name.clone())
        .collect()
}

/// 起点側・終点側それぞれで転送するフィールド
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferFields {
    pub origin: Vec<String>,
    pub destination: Vec<String>,
}

impl TransferFields {
    pub fn discover(origins: &Schema, destinations: &Schema) -> Self {
        Self {
            origin: supported_stop_fields(origins),
            destination: supported_stop_fields(destinations),
        }
    }
}
