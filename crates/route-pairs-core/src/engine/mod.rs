//! ルーティングエンジンの capability インターフェース
//!
//! コアはルート計算の中身を知らない。必要なのはセッションの初期化・
//! プロパティ設定・Stop 投入・求解だけで、結果はテーブルとして受け取る。

pub mod process;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::properties::PropertyMap;
use crate::table::Table;

pub use process::{BarrierSet, ProcessEngine, ProcessEngineConfig, Reply, Request};

/// Stops に付与する入力起点の一意 ID 列
pub const ORIGIN_UNIQUE_ID: &str = "OriginUniqueID";
/// Stops に付与する入力終点の一意 ID 列
pub const DESTINATION_UNIQUE_ID: &str = "DestinationUniqueID";
/// 出力 Stops のオブジェクト ID 列
pub const STOP_OBJECT_ID: &str = "ObjectID";
/// 出力 Routes の最初 / 最後の Stop を指す列
pub const FIRST_STOP_OID: &str = "FirstStopOID";
pub const LAST_STOP_OID: &str = "LastStopOID";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn solver {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("solver protocol error: {0}")]
    Protocol(String),

    /// エンジンが要求を拒否した（未対応のプロパティ値など）
    #[error("{0}")]
    Rejected(String),

    #[error("solver did not reply within {0:?}")]
    Timeout(Duration),

    #[error("solver process exited")]
    Closed,
}

/// ソルバに投入する 1 停止点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub route_name: String,
    pub sequence: u32,
    pub origin_unique_id: Value,
    pub destination_unique_id: Value,
    pub shape: Value,
    /// 転送フィールド（名前 → 値）
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierKind {
    Point,
    Line,
    Polygon,
}

impl BarrierKind {
    /// 最初の非 null ジオメトリの `type` から種別を決める
    pub fn classify(table: &Table) -> Option<Self> {
        let idx = table.schema.geometry_index()?;
        let geometry = table.rows.iter().map(|r| &r[idx]).find(|v| !v.is_null())?;
        match geometry.get("type").and_then(Value::as_str)? {
            "Point" | "MultiPoint" => Some(BarrierKind::Point),
            "LineString" | "MultiLineString" => Some(BarrierKind::Line),
            "Polygon" | "MultiPolygon" => Some(BarrierKind::Polygon),
            _ => None,
        }
    }
}

/// 求解結果のテーブル一式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResultSet {
    pub routes: Table,
    pub stops: Table,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub succeeded: bool,
    pub messages: Vec<String>,
    pub result: Option<RouteResultSet>,
}

/// セッションを生成するエンジン。全ワーカーで共有されるので `Send + Sync`。
pub trait RoutingEngine: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn RouteSession>, EngineError>;
}

/// 1 ジョブが排他的に所有するソルバオブジェクト
pub trait RouteSession {
    /// エンジン既定のプロパティ値
    fn default_properties(&self) -> PropertyMap;

    fn set_property(&mut self, name: &str, value: &Value) -> Result<(), EngineError>;

    fn insert_stops(&mut self, stops: Vec<Stop>) -> Result<(), EngineError>;

    fn stop_count(&self) -> usize;

    fn load_barriers(&mut self, kind: BarrierKind, barriers: &Table) -> Result<(), EngineError>;

    fn solve(&mut self) -> Result<SolveOutcome, EngineError>;
}
