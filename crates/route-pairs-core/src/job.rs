//! 1 チャンク分のルート計算ジョブ
//!
//! ジョブは専用のスクラッチディレクトリとソルバセッションを排他的に持ち、
//! 何が起きても `JobResult` を 1 つ返す。致命的なのはディレクトリ作成の
//! 失敗だけで、それは `JobUnit::new` が `BatchError::Resource` として返す。

use std::collections::HashMap;
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::BatchConfig;
use crate::engine::{
    self, BarrierKind, EngineError, RouteResultSet, RouteSession, RoutingEngine, Stop,
};
use crate::error::{BatchError, Result};
use crate::event::{EventSink, Severity};
use crate::fields::TransferFields;
use crate::plan::Chunk;
use crate::properties::{self, Layer};
use crate::scratch::ScratchRoot;
use crate::settings::{AnalysisSettings, TravelDirection};
use crate::table::{self, Row, Table, TableError, id_display, id_key};

/// ジョブごとのログファイル名
pub const JOB_LOG_FILE: &str = "RoutePairs.log";
/// 結果テーブルを書き出すジョブ内サブディレクトリ
pub const JOB_OUTPUT_DIR: &str = "output";
pub const NO_VALID_DESTINATIONS: &str = "No valid destinations for this set of origins";

/// 名前付きの入力テーブル（バリアなど）
#[derive(Debug, Clone)]
pub struct NamedTable {
    pub name: String,
    pub table: Table,
}

/// 全ジョブで共有する入力データ
#[derive(Debug, Clone)]
pub struct JobInputs {
    pub origins: Table,
    pub origin_id_field: String,
    pub assigned_dest_field: String,
    pub destinations: Table,
    pub dest_id_field: String,
    pub barriers: Vec<NamedTable>,
}

/// 全ジョブで共有する読み取り専用コンテキスト。
///
/// pre-flight 前に `Arc` に包まれ、以降は変更されない。
pub struct JobContext {
    pub inputs: JobInputs,
    pub settings: AnalysisSettings,
    pub config: BatchConfig,
    pub transfer_fields: TransferFields,
    pub engine: Arc<dyn RoutingEngine>,
    pub scratch: ScratchRoot,
    origin_id_idx: usize,
    assigned_dest_idx: usize,
    origin_shape_idx: usize,
    dest_id_idx: usize,
    dest_shape_idx: usize,
    origin_transfer: Vec<(String, usize)>,
    dest_transfer: Vec<(String, usize)>,
    /// 終点 ID キー → 行位置（ID が重複する場合は先頭の行）
    dest_index: HashMap<String, usize>,
}

fn required(table: &Table, label: &str, field: &str) -> Result<usize> {
    table
        .require_field(label, field)
        .map_err(|e| BatchError::InvalidInput(e.to_string()))
}

fn geometry(table: &Table, label: &str) -> Result<usize> {
    table
        .schema
        .geometry_index()
        .ok_or_else(|| BatchError::InvalidInput(format!("{label} has no geometry field")))
}

fn transfer_indices(table: &Table, names: &[String]) -> Vec<(String, usize)> {
    names
        .iter()
        .filter_map(|n| table.schema.index_of(n).map(|i| (n.clone(), i)))
        .collect()
}

impl JobContext {
    pub fn new(
        inputs: JobInputs,
        settings: AnalysisSettings,
        config: BatchConfig,
        engine: Arc<dyn RoutingEngine>,
        scratch: ScratchRoot,
    ) -> Result<Self> {
        if inputs.origins.is_empty() {
            return Err(BatchError::InvalidInput("Origins has no rows".to_string()));
        }
        if inputs.destinations.is_empty() {
            return Err(BatchError::InvalidInput("Destinations has no rows".to_string()));
        }
        let origin_id_idx = required(&inputs.origins, "Origins", &inputs.origin_id_field)?;
        let assigned_dest_idx = required(&inputs.origins, "Origins", &inputs.assigned_dest_field)?;
        let dest_id_idx = required(&inputs.destinations, "Destinations", &inputs.dest_id_field)?;
        let origin_shape_idx = geometry(&inputs.origins, "Origins")?;
        let dest_shape_idx = geometry(&inputs.destinations, "Destinations")?;

        let transfer_fields =
            TransferFields::discover(&inputs.origins.schema, &inputs.destinations.schema);
        let origin_transfer = transfer_indices(&inputs.origins, &transfer_fields.origin);
        let dest_transfer = transfer_indices(&inputs.destinations, &transfer_fields.destination);

        let mut dest_index = HashMap::with_capacity(inputs.destinations.len());
        for (i, row) in inputs.destinations.rows.iter().enumerate() {
            if let Some(key) = id_key(&row[dest_id_idx]) {
                dest_index.entry(key).or_insert(i);
            }
        }

        Ok(Self {
            inputs,
            settings,
            config,
            transfer_fields,
            engine,
            scratch,
            origin_id_idx,
            assigned_dest_idx,
            origin_shape_idx,
            dest_id_idx,
            dest_shape_idx,
            origin_transfer,
            dest_transfer,
            dest_index,
        })
    }

    /// チャンク範囲（1 始まり、両端含む）に入る起点行
    pub fn origin_rows(&self, chunk: Chunk) -> &[Row] {
        let rows = &self.inputs.origins.rows;
        let start = chunk.low.saturating_sub(1).min(rows.len());
        let end = chunk.high.min(rows.len()).max(start);
        &rows[start..end]
    }

    fn destination(&self, dest_id: &Value) -> Option<&Row> {
        let key = id_key(dest_id)?;
        self.dest_index.get(&key).map(|&i| &self.inputs.destinations.rows[i])
    }
}

/// ソルバ出力の位置。チャンク順（同じなら path 順）で並ぶ。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OutputLocation {
    pub chunk: Chunk,
    pub path: PathBuf,
}

/// ジョブ 1 件の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub scratch_dir: PathBuf,
    pub chunk: Chunk,
    pub succeeded: bool,
    pub messages: Vec<String>,
    pub output: Option<OutputLocation>,
    pub log_file: PathBuf,
}

/// ジョブ専用のログファイル。各行は `<job_id> | <message>`。
///
/// `forward` があれば Warning 以上をそちらにも流す（pre-flight 用）。
pub struct JobLog {
    job_id: String,
    file: Mutex<LineWriter<File>>,
    forward: Option<Arc<dyn EventSink>>,
}

impl JobLog {
    pub fn create(path: &Path, job_id: &str, forward: Option<Arc<dyn EventSink>>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            job_id: job_id.to_string(),
            file: Mutex::new(LineWriter::new(file)),
            forward,
        })
    }
}

impl EventSink for JobLog {
    fn emit(&self, severity: Severity, text: &str) {
        // ログ書き込みの失敗でジョブは止めない
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "{} | {}", self.job_id, text);
        }
        if severity >= Severity::Warning {
            if let Some(forward) = &self.forward {
                forward.emit(severity, text);
            }
        }
    }
}

#[derive(Debug, Error)]
enum JobError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("failed to create {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("batch was abandoned before the results were exported")]
    Abandoned,
}

/// 128bit 乱数の 16 進表現
pub fn new_job_id() -> String {
    let bits: u128 = rand::random();
    format!("{bits:032x}")
}

pub struct JobUnit {
    job_id: String,
    job_dir: PathBuf,
    log_file: PathBuf,
    ctx: Arc<JobContext>,
    log: JobLog,
    session: Option<Box<dyn RouteSession>>,
}

impl JobUnit {
    pub fn new(ctx: Arc<JobContext>) -> Result<Self> {
        Self::create(ctx, None)
    }

    /// Warning 以上のログを `sink` にも流すジョブ（pre-flight 用）
    pub fn with_forwarding(ctx: Arc<JobContext>, sink: Arc<dyn EventSink>) -> Result<Self> {
        Self::create(ctx, Some(sink))
    }

    fn create(ctx: Arc<JobContext>, forward: Option<Arc<dyn EventSink>>) -> Result<Self> {
        let job_id = new_job_id();
        let job_dir = ctx.scratch.create_job_dir(&job_id)?;
        let log_file = job_dir.join(JOB_LOG_FILE);
        let log = JobLog::create(&log_file, &job_id, forward).map_err(|source| {
            BatchError::Resource {
                path: log_file.clone(),
                source,
            }
        })?;
        Ok(Self {
            job_id,
            job_dir,
            log_file,
            ctx,
            log,
            session: None,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.job_dir
    }

    /// セッションを開き、3 層マージしたプロパティを設定する。
    ///
    /// 静的テーブルの値が拒否された場合は警告して既定値のまま続行する。
    /// 呼び出し側制御のプロパティが拒否された場合はエラー。
    pub fn initialize_solver(&mut self) -> std::result::Result<(), EngineError> {
        let ctx = Arc::clone(&self.ctx);
        self.log.debug("Creating Route object...");
        let mut session = ctx.engine.open_session()?;

        let defaults = session.default_properties();
        let caller = ctx.settings.caller_properties();
        let mut merged =
            properties::merge(&defaults, &ctx.config.solver_properties, &caller);

        for prop in merged.ignored() {
            self.log.warning(&format!(
                "Route config file property {prop} is handled explicitly by the tool parameters and will be ignored."
            ));
        }

        self.log.debug("Setting Route analysis properties from config file...");
        let table_values: Vec<(String, Value)> = merged
            .from_layer(Layer::StaticTable)
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let is_service = ctx.settings.network.is_service();
        for (prop, value) in table_values {
            match session.set_property(&prop, &value) {
                Ok(()) => self.log.debug(&format!("{prop}: {value}")),
                Err(e) => {
                    // 古いサービスは検索許容範囲を受け付けないので黙って既定値を使う
                    if !(is_service && properties::SERVICE_OPTIONAL.contains(&prop.as_str())) {
                        self.log.warning(&format!(
                            "Failed to set property {prop} from config file. Default will be used instead."
                        ));
                        self.log.warning(&e.to_string());
                    }
                    merged.revert_to_default(&prop, &defaults);
                }
            }
        }

        self.log.debug("Setting Route analysis properties specified tool inputs...");
        for (prop, value) in merged.from_layer(Layer::CallerOverride) {
            session.set_property(prop, value)?;
            self.log.debug(&format!("{prop}: {value}"));
        }

        self.session = Some(session);
        Ok(())
    }

    /// チャンクを解いて結果を返す。内部エラーは `succeeded=false` に変換される。
    pub fn run(mut self, chunk: Chunk) -> JobResult {
        self.log.info(&format!(
            "Processing origins OID {} to {} as job id {}",
            chunk.low, chunk.high, self.job_id
        ));
        let mut result = JobResult {
            job_id: self.job_id.clone(),
            scratch_dir: self.job_dir.clone(),
            chunk,
            succeeded: false,
            messages: Vec::new(),
            output: None,
            log_file: self.log_file.clone(),
        };
        if let Err(e) = self.solve(chunk, &mut result) {
            let text = e.to_string();
            self.log.error(&format!("Error solving Route: {text}"));
            result.succeeded = false;
            result.output = None;
            result.messages.push(text);
        }
        result
    }

    fn solve(&mut self, chunk: Chunk, result: &mut JobResult) -> std::result::Result<(), JobError> {
        let ctx = Arc::clone(&self.ctx);
        let origins = ctx.origin_rows(chunk);
        self.log.debug(&format!("Number of origins selected: {}", origins.len()));

        self.initialize_solver()?;
        let Some(mut session) = self.session.take() else {
            return Err(EngineError::Protocol("solver session was not initialized".to_string()).into());
        };

        let stops = self.build_stops(&ctx, origins);
        session.insert_stops(stops)?;

        if session.stop_count() == 0 {
            self.log.debug("No valid destinations for this set of origins. Skipping Route calculation.");
            result.messages.push(NO_VALID_DESTINATIONS.to_string());
            return Ok(());
        }

        for barrier in &ctx.inputs.barriers {
            self.log.debug(&format!("Loading barriers {}...", barrier.name));
            match BarrierKind::classify(&barrier.table) {
                Some(kind) => session.load_barriers(kind, &barrier.table)?,
                None => self.log.warning(&format!(
                    "Barrier feature class {} has an invalid shape type and will be ignored.",
                    barrier.name
                )),
            }
        }

        self.log.debug("Solving Route...");
        let start = Instant::now();
        let outcome = session.solve()?;
        self.log.debug(&format!(
            "Solving Route completed in {:.3} seconds.",
            start.elapsed().as_secs_f64()
        ));
        for msg in &outcome.messages {
            self.log.debug(msg);
        }
        result.messages = outcome.messages;
        if !outcome.succeeded {
            self.log.debug("Solve failed.");
            return Ok(());
        }
        self.log.debug("Solve succeeded.");

        let Some(set) = outcome.result else {
            return Err(EngineError::Protocol("solve succeeded without result tables".to_string()).into());
        };
        let routes_path = self.export(&ctx, chunk, set)?;
        result.output = Some(OutputLocation {
            chunk,
            path: routes_path,
        });
        result.succeeded = true;
        self.log.debug("Finished calculating Route.");
        Ok(())
    }

    /// 起点 Stop を全て並べ、その後に対応する終点 Stop を同じ順で並べる
    fn build_stops(&self, ctx: &JobContext, origins: &[Row]) -> Vec<Stop> {
        let direction = ctx.settings.direction;
        let (origin_seq, dest_seq) = direction.sequences();
        let mut origin_stops = Vec::with_capacity(origins.len());
        let mut dest_stops = Vec::with_capacity(origins.len());
        let mut unmatched = 0usize;

        for origin in origins {
            let dest_id = &origin[ctx.assigned_dest_idx];
            if dest_id.is_null() {
                continue;
            }
            let Some(destination) = ctx.destination(dest_id) else {
                unmatched += 1;
                continue;
            };
            let origin_id = &origin[ctx.origin_id_idx];
            let route_name = match direction {
                TravelDirection::Forward => {
                    format!("{} - {}", id_display(origin_id), id_display(dest_id))
                }
                TravelDirection::Reverse => {
                    format!("{} - {}", id_display(dest_id), id_display(origin_id))
                }
            };
            origin_stops.push(Stop {
                route_name: route_name.clone(),
                sequence: origin_seq,
                origin_unique_id: origin_id.clone(),
                destination_unique_id: Value::Null,
                shape: origin[ctx.origin_shape_idx].clone(),
                attributes: attributes(origin, &ctx.origin_transfer),
            });
            dest_stops.push(Stop {
                route_name,
                sequence: dest_seq,
                origin_unique_id: Value::Null,
                destination_unique_id: destination[ctx.dest_id_idx].clone(),
                shape: destination[ctx.dest_shape_idx].clone(),
                attributes: attributes(destination, &ctx.dest_transfer),
            });
        }

        if unmatched > 0 {
            self.log.debug(&format!(
                "Skipped {unmatched} origins whose assigned destination is not in the destinations table."
            ));
        }
        origin_stops.extend(dest_stops);
        origin_stops
    }

    /// Routes / Stops をチャンク名付きで書き出し、Routes に入力 ID を結合する。
    ///
    /// 放棄されたバッチでは書き出さない。ジョブフォルダが既に削除されていれば
    /// 作り直さずにエラーにする。
    fn export(
        &self,
        ctx: &JobContext,
        chunk: Chunk,
        set: RouteResultSet,
    ) -> std::result::Result<PathBuf, JobError> {
        if ctx.scratch.is_abandoned() {
            return Err(JobError::Abandoned);
        }
        let out_dir = self.job_dir.join(JOB_OUTPUT_DIR);
        std::fs::create_dir(&out_dir).map_err(|source| JobError::OutputDir {
            path: out_dir.clone(),
            source,
        })?;
        let RouteResultSet { mut routes, stops } = set;

        let stops_path = out_dir.join(format!("Stops_{}.jsonl", chunk.suffix()));
        self.log.debug(&format!("Exporting Route Stops output to {}...", stops_path.display()));
        table::write_table_in_existing_dir(&stops_path, &stops)?;

        join_unique_ids(&mut routes, &stops, ctx.settings.direction)?;
        if ctx.scratch.is_abandoned() {
            return Err(JobError::Abandoned);
        }
        let routes_path = out_dir.join(format!("Routes_{}.jsonl", chunk.suffix()));
        self.log.debug(&format!("Exporting Route Routes output to {}...", routes_path.display()));
        table::write_table_in_existing_dir(&routes_path, &routes)?;
        Ok(routes_path)
    }
}

fn attributes(row: &Row, fields: &[(String, usize)]) -> Map<String, Value> {
    fields.iter().map(|(name, i)| (name.clone(), row[*i].clone())).collect()
}

/// Routes の FirstStopOID / LastStopOID を Stops の ObjectID と突き合わせ、
/// 起点・終点の一意 ID 列を Routes に追加する。逆方向では最初の Stop が終点。
pub fn join_unique_ids(
    routes: &mut Table,
    stops: &Table,
    direction: TravelDirection,
) -> std::result::Result<(), TableError> {
    let (first_field, last_field) = match direction {
        TravelDirection::Forward => (engine::ORIGIN_UNIQUE_ID, engine::DESTINATION_UNIQUE_ID),
        TravelDirection::Reverse => (engine::DESTINATION_UNIQUE_ID, engine::ORIGIN_UNIQUE_ID),
    };
    let oid_idx = stops.require_field("Stops", engine::STOP_OBJECT_ID)?;
    let by_oid: HashMap<String, usize> = stops
        .rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| id_key(&row[oid_idx]).map(|k| (k, i)))
        .collect();

    for (oid_field, id_field) in [
        (engine::FIRST_STOP_OID, first_field),
        (engine::LAST_STOP_OID, last_field),
    ] {
        let ref_idx = routes.require_field("Routes", oid_field)?;
        let src_idx = stops.require_field("Stops", id_field)?;
        let values: Vec<Value> = routes
            .rows
            .iter()
            .map(|row| {
                id_key(&row[ref_idx])
                    .and_then(|k| by_oid.get(&k))
                    .map(|&i| stops.rows[i][src_idx].clone())
                    .unwrap_or(Value::Null)
            })
            .collect();
        routes.append_column(stops.schema.fields[src_idx].clone(), values)?;
    }
    Ok(())
}
