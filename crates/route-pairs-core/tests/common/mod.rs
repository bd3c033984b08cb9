#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use route_pairs_core::BatchRequest;
use route_pairs_core::config::BatchConfig;
use route_pairs_core::engine::{
    BarrierKind, EngineError, RouteResultSet, RouteSession, RoutingEngine, SolveOutcome, Stop,
};
use route_pairs_core::properties::PropertyMap;
use route_pairs_core::settings::{
    AnalysisSettings, DistanceUnits, NetworkSource, TimeUnits, TravelDirection,
};
use route_pairs_core::table::{Field, FieldType, Schema, Table, write_table};
use serde_json::{Value, json};

/// 入力 Stop から決定的に Routes / Stops を組み立てるエンジン
#[derive(Default)]
pub struct FakeEngine {
    /// 全ての求解を「解なし」にする
    pub fail_all: bool,
    /// この起点 ID を含むチャンクで panic する
    pub panic_on_origin: Option<Value>,
    /// この起点 ID を含むチャンクは求解前に待たされる
    pub delay_on_origin: Option<(Value, Duration)>,
    /// この起点 ID を含むチャンクの Routes から指定列を落とす
    pub drop_route_field: Option<(Value, String)>,
    /// 設定を拒否するプロパティ名
    pub reject_properties: HashSet<String>,
    pub sessions: AtomicUsize,
    /// 求解に渡された Stop 列（solve 呼び出しごと）
    pub solved: Arc<Mutex<Vec<Vec<Stop>>>>,
    pub loaded_barriers: Arc<Mutex<Vec<BarrierKind>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(names: &[&str]) -> Self {
        Self {
            reject_properties: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl RoutingEngine for FakeEngine {
    fn open_session(&self) -> Result<Box<dyn RouteSession>, EngineError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            fail_all: self.fail_all,
            panic_on_origin: self.panic_on_origin.clone(),
            delay_on_origin: self.delay_on_origin.clone(),
            drop_route_field: self.drop_route_field.clone(),
            reject: self.reject_properties.clone(),
            props: default_properties(),
            stops: Vec::new(),
            solved: Arc::clone(&self.solved),
            loaded_barriers: Arc::clone(&self.loaded_barriers),
        }))
    }
}

pub fn default_properties() -> PropertyMap {
    [
        ("searchTolerance", json!(5000)),
        ("searchToleranceUnits", json!("Meters")),
        ("returnDirections", json!(false)),
        ("timeUnits", json!("Minutes")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

pub struct FakeSession {
    fail_all: bool,
    panic_on_origin: Option<Value>,
    delay_on_origin: Option<(Value, Duration)>,
    drop_route_field: Option<(Value, String)>,
    reject: HashSet<String>,
    props: PropertyMap,
    stops: Vec<Stop>,
    solved: Arc<Mutex<Vec<Vec<Stop>>>>,
    loaded_barriers: Arc<Mutex<Vec<BarrierKind>>>,
}

impl RouteSession for FakeSession {
    fn default_properties(&self) -> PropertyMap {
        default_properties()
    }

    fn set_property(&mut self, name: &str, value: &Value) -> Result<(), EngineError> {
        if self.reject.contains(name) {
            return Err(EngineError::Rejected(format!("unsupported value for {name}")));
        }
        self.props.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn insert_stops(&mut self, stops: Vec<Stop>) -> Result<(), EngineError> {
        self.stops.extend(stops);
        Ok(())
    }

    fn stop_count(&self) -> usize {
        self.stops.len()
    }

    fn load_barriers(&mut self, kind: BarrierKind, _barriers: &Table) -> Result<(), EngineError> {
        self.loaded_barriers.lock().unwrap().push(kind);
        Ok(())
    }

    fn solve(&mut self) -> Result<SolveOutcome, EngineError> {
        self.solved.lock().unwrap().push(self.stops.clone());
        let has_origin = |id: &Value| self.stops.iter().any(|s| &s.origin_unique_id == id);
        if let Some(bad) = &self.panic_on_origin {
            if has_origin(bad) {
                panic!("solver crashed on origin {bad}");
            }
        }
        if let Some((slow, delay)) = &self.delay_on_origin {
            if has_origin(slow) {
                std::thread::sleep(*delay);
            }
        }
        if self.fail_all {
            return Ok(SolveOutcome {
                succeeded: false,
                messages: vec!["No route found".to_string()],
                result: None,
            });
        }
        let mut result = solve_stops(&self.stops);
        if let Some((origin, field)) = &self.drop_route_field {
            if has_origin(origin) {
                result.routes = without_field(&result.routes, field);
            }
        }
        Ok(SolveOutcome {
            succeeded: true,
            messages: vec![format!("Solved {} stops", self.stops.len())],
            result: Some(result),
        })
    }
}

/// Stop を RouteName ごとにまとめ、Sequence 最小 / 最大を最初 / 最後の Stop とする
pub fn solve_stops(stops: &[Stop]) -> RouteResultSet {
    let mut stops_table = Table::new(Schema::new(vec![
        Field::new("ObjectID", FieldType::Oid),
        Field::new("RouteName", FieldType::Text),
        Field::new("Sequence", FieldType::Integer),
        Field::new("OriginUniqueID", FieldType::Integer),
        Field::new("DestinationUniqueID", FieldType::Text),
    ]));
    for (i, s) in stops.iter().enumerate() {
        stops_table
            .push_row(vec![
                json!(i + 1),
                json!(s.route_name),
                json!(s.sequence),
                s.origin_unique_id.clone(),
                s.destination_unique_id.clone(),
            ])
            .unwrap();
    }

    let mut names: Vec<&str> = Vec::new();
    for s in stops {
        if !names.contains(&s.route_name.as_str()) {
            names.push(&s.route_name);
        }
    }
    let mut routes = Table::new(Schema::new(vec![
        Field::new("Name", FieldType::Text),
        Field::new("FirstStopOID", FieldType::Integer),
        Field::new("LastStopOID", FieldType::Integer),
        Field::new("Total_Minutes", FieldType::Double),
    ]));
    for name in names {
        let members: Vec<(usize, &Stop)> = stops
            .iter()
            .enumerate()
            .filter(|(_, s)| s.route_name == name)
            .collect();
        let first = members.iter().min_by_key(|(_, s)| s.sequence).unwrap().0 + 1;
        let last = members.iter().max_by_key(|(_, s)| s.sequence).unwrap().0 + 1;
        routes
            .push_row(vec![json!(name), json!(first), json!(last), json!(1.5)])
            .unwrap();
    }
    RouteResultSet {
        routes,
        stops: stops_table,
    }
}

fn without_field(table: &Table, name: &str) -> Table {
    let idx = table.schema.index_of(name).unwrap();
    let mut fields = table.schema.fields.clone();
    fields.remove(idx);
    let mut out = Table::new(Schema::new(fields));
    for row in &table.rows {
        let mut row = row.clone();
        row.remove(idx);
        out.push_row(row).unwrap();
    }
    out
}

pub fn point(x: f64, y: f64) -> Value {
    json!({"type": "Point", "coordinates": [x, y]})
}

/// 起点 i（1 始まり）は終点 `assign(i)` に割り当てる
pub fn origins_table(n: usize, assign: impl Fn(usize) -> Value) -> Table {
    let mut t = Table::new(Schema::new(vec![
        Field::new("OriginID", FieldType::Integer),
        Field::new("DestID", FieldType::Text),
        Field::new("SHAPE", FieldType::Geometry),
        Field::new("CurbApproach", FieldType::SmallInteger),
    ]));
    for i in 1..=n {
        t.push_row(vec![json!(i), assign(i), point(i as f64, 0.0), json!(0)])
            .unwrap();
    }
    t
}

pub fn destinations_table(ids: &[&str]) -> Table {
    let mut t = Table::new(Schema::new(vec![
        Field::new("StoreID", FieldType::Text),
        Field::new("SHAPE", FieldType::Geometry),
        Field::new("Name", FieldType::Text),
    ]));
    for (i, id) in ids.iter().enumerate() {
        t.push_row(vec![json!(id), point(0.0, i as f64), json!(format!("Store {id}"))])
            .unwrap();
    }
    t
}

pub fn settings(direction: TravelDirection) -> AnalysisSettings {
    AnalysisSettings {
        network: NetworkSource::new("/data/SanFrancisco/Streets_ND"),
        travel_mode: "Driving Time".to_string(),
        time_units: TimeUnits::Minutes,
        distance_units: DistanceUnits::Miles,
        time_of_day: None,
        direction,
    }
}

/// 入力ファイルを書き出してリクエストを作る
pub fn request(dir: &Path, origins: &Table, destinations: &Table, max_routes: usize) -> BatchRequest {
    let origins_path = dir.join("origins.jsonl");
    let dest_path = dir.join("destinations.jsonl.gz");
    write_table(&origins_path, origins).unwrap();
    write_table(&dest_path, destinations).unwrap();
    BatchRequest {
        origins: origins_path,
        origin_id_field: "OriginID".to_string(),
        assigned_dest_field: "DestID".to_string(),
        destinations: dest_path,
        dest_id_field: "StoreID".to_string(),
        barriers: Vec::new(),
        settings: settings(TravelDirection::Forward),
        max_routes,
        max_processes: 2,
        out_routes: dir.join("out").join("routes.jsonl"),
        scratch_folder: dir.join("scratch"),
        config: BatchConfig::default(),
    }
}

pub fn engine(e: FakeEngine) -> Arc<dyn RoutingEngine> {
    Arc::new(e)
}

pub fn dir_entries(p: &PathBuf) -> usize {
    std::fs::read_dir(p).map(|d| d.count()).unwrap_or(0)
}
