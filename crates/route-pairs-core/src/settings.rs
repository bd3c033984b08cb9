//! 解析設定（単位・出発時刻・走行方向・ネットワークソース）

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BatchError;
use crate::properties::{self, PropertyMap};

/// 出発時刻の文字列形式
pub const DATETIME_FORMAT: &str = "%Y%m%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnits {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnits {
    pub fn name(self) -> &'static str {
        match self {
            TimeUnits::Days => "Days",
            TimeUnits::Hours => "Hours",
            TimeUnits::Minutes => "Minutes",
            TimeUnits::Seconds => "Seconds",
        }
    }
}

impl FromStr for TimeUnits {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "days" => Ok(TimeUnits::Days),
            "hours" => Ok(TimeUnits::Hours),
            "minutes" => Ok(TimeUnits::Minutes),
            "seconds" => Ok(TimeUnits::Seconds),
            _ => Err(BatchError::InvalidConfiguration(format!("Invalid time units: {s}"))),
        }
    }
}

impl fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceUnits {
    Kilometers,
    Meters,
    Miles,
    Yards,
    Feet,
    NauticalMiles,
}

impl DistanceUnits {
    pub fn name(self) -> &'static str {
        match self {
            DistanceUnits::Kilometers => "Kilometers",
            DistanceUnits::Meters => "Meters",
            DistanceUnits::Miles => "Miles",
            DistanceUnits::Yards => "Yards",
            DistanceUnits::Feet => "Feet",
            DistanceUnits::NauticalMiles => "NauticalMiles",
        }
    }
}

impl FromStr for DistanceUnits {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kilometers" => Ok(DistanceUnits::Kilometers),
            "meters" => Ok(DistanceUnits::Meters),
            "miles" => Ok(DistanceUnits::Miles),
            "yards" => Ok(DistanceUnits::Yards),
            "feet" => Ok(DistanceUnits::Feet),
            "nauticalmiles" | "nautical miles" => Ok(DistanceUnits::NauticalMiles),
            _ => Err(BatchError::InvalidConfiguration(format!("Invalid distance units: {s}"))),
        }
    }
}

impl fmt::Display for DistanceUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 出発時刻を解釈する。空文字は time-neutral（`None`）。
pub fn parse_time_of_day(s: Option<&str>) -> Result<Option<NaiveDateTime>, BatchError> {
    let Some(s) = s.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).map(Some).map_err(|e| {
        BatchError::InvalidConfiguration(format!(
            "invalid time of day '{s}' (expected {DATETIME_FORMAT}): {e}"
        ))
    })
}

/// 走行方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TravelDirection {
    /// 起点 → 割当終点
    #[default]
    Forward,
    /// 終点 → 起点
    Reverse,
}

impl TravelDirection {
    pub fn from_reverse_flag(reverse: bool) -> Self {
        if reverse {
            TravelDirection::Reverse
        } else {
            TravelDirection::Forward
        }
    }

    /// (起点の Sequence, 終点の Sequence)
    pub fn sequences(self) -> (u32, u32) {
        match self {
            TravelDirection::Forward => (1, 2),
            TravelDirection::Reverse => (2, 1),
        }
    }
}

/// ネットワークデータソース（ローカルデータセットのパスまたはサービス URL）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSource(pub String);

impl NetworkSource {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn is_service(&self) -> bool {
        self.0.starts_with("http")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// ツール引数として指定される解析設定
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub network: NetworkSource,
    /// トラベルモードの名前、または JSON 文字列表現
    pub travel_mode: String,
    pub time_units: TimeUnits,
    pub distance_units: DistanceUnits,
    pub time_of_day: Option<NaiveDateTime>,
    pub direction: TravelDirection,
}

impl AnalysisSettings {
    /// 最優先の層として渡すプロパティ
    pub fn caller_properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(properties::TRAVEL_MODE.to_string(), Value::String(self.travel_mode.clone()));
        props.insert(properties::TIME_UNITS.to_string(), Value::String(self.time_units.to_string()));
        props.insert(
            properties::DISTANCE_UNITS.to_string(),
            Value::String(self.distance_units.to_string()),
        );
        let tod = self
            .time_of_day
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S").to_string()))
            .unwrap_or(Value::Null);
        props.insert(properties::TIME_OF_DAY.to_string(), tod);
        props
    }
}
