//! ソルバプロパティの 3 層マージ
//!
//! 優先度の低い順に (1) エンジン既定値、(2) 設定ファイルの静的テーブル、
//! (3) 呼び出し側が明示的に制御するプロパティ。(3) は常に勝ち、(2) で
//! 上書きされることはない。

use std::collections::BTreeMap;

use serde_json::Value;

pub type PropertyMap = BTreeMap<String, Value>;

pub const TRAVEL_MODE: &str = "travelMode";
pub const TIME_UNITS: &str = "timeUnits";
pub const DISTANCE_UNITS: &str = "distanceUnits";
pub const TIME_OF_DAY: &str = "timeOfDay";

/// 呼び出し側（ツールの引数）が制御するプロパティ
pub const CALLER_CONTROLLED: &[&str] = &[TRAVEL_MODE, TIME_UNITS, DISTANCE_UNITS, TIME_OF_DAY];

/// サービスの古い版が受け付けないため、拒否されても警告しないプロパティ
pub const SERVICE_OPTIONAL: &[&str] = &["searchTolerance", "searchToleranceUnits"];

pub fn is_caller_controlled(name: &str) -> bool {
    CALLER_CONTROLLED.contains(&name)
}

/// 値がどの層から来たか
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    EngineDefault,
    StaticTable,
    CallerOverride,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProperty {
    pub value: Value,
    pub layer: Layer,
}

/// マージ結果
#[derive(Debug, Clone, Default)]
pub struct MergedProperties {
    entries: BTreeMap<String, ResolvedProperty>,
    /// 静的テーブルにあったが呼び出し側制御のため無視したキー
    ignored: Vec<String>,
}

impl MergedProperties {
    pub fn get(&self, name: &str) -> Option<&ResolvedProperty> {
        self.entries.get(name)
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    /// 層ごとの値を名前順で返す
    pub fn from_layer(&self, layer: Layer) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter(move |(_, p)| p.layer == layer)
            .map(|(k, p)| (k.as_str(), &p.value))
    }

    /// 静的テーブルの値が拒否されたとき、既定値に戻す
    pub fn revert_to_default(&mut self, name: &str, defaults: &PropertyMap) {
        match defaults.get(name) {
            Some(v) => {
                self.entries.insert(
                    name.to_string(),
                    ResolvedProperty {
                        value: v.clone(),
                        layer: Layer::EngineDefault,
                    },
                );
            }
            None => {
                self.entries.remove(name);
            }
        }
    }
}

pub fn merge(defaults: &PropertyMap, table: &PropertyMap, overrides: &PropertyMap) -> MergedProperties {
    let mut merged = MergedProperties::default();
    for (k, v) in defaults {
        merged.entries.insert(
            k.clone(),
            ResolvedProperty {
                value: v.clone(),
                layer: Layer::EngineDefault,
            },
        );
    }
    for (k, v) in table {
        if is_caller_controlled(k) {
            merged.ignored.push(k.clone());
            continue;
        }
        merged.entries.insert(
            k.clone(),
            ResolvedProperty {
                value: v.clone(),
                layer: Layer::StaticTable,
            },
        );
    }
    for (k, v) in overrides {
        merged.entries.insert(
            k.clone(),
            ResolvedProperty {
                value: v.clone(),
                layer: Layer::CallerOverride,
            },
        );
    }
    merged
}
