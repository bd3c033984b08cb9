//! バッチ全体の流れ
//!
//! 入力読み込み → チャンク分割 → 転送フィールド検出 → pre-flight →
//! 並列ディスパッチ → 成功分のマージ → スクラッチ削除。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;

use crate::config::BatchConfig;
use crate::dispatch::{self, JobOutcome, JobTask};
use crate::engine::RoutingEngine;
use crate::error::{BatchError, Result};
use crate::event::EventSink;
use crate::job::{JobContext, JobInputs, NamedTable};
use crate::merge;
use crate::plan;
use crate::preflight;
use crate::scheduler::ThreadPoolScheduler;
use crate::scratch::{CleanupPolicy, CleanupTarget, ScratchRoot};
use crate::settings::AnalysisSettings;
use crate::table::{self, Table, TableError};

/// バッチの入力パラメータ
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub origins: PathBuf,
    pub origin_id_field: String,
    pub assigned_dest_field: String,
    pub destinations: PathBuf,
    pub dest_id_field: String,
    pub barriers: Vec<PathBuf>,
    pub settings: AnalysisSettings,
    /// 1 チャンクあたりの最大ルート数
    pub max_routes: usize,
    /// 同時に動かすワーカー数の上限
    pub max_processes: usize,
    pub out_routes: PathBuf,
    pub scratch_folder: PathBuf,
    pub config: BatchConfig,
}

/// バッチの最終結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub total_chunks: usize,
    pub succeeded_chunks: usize,
    pub failed_chunks: usize,
    pub combined_output: Option<PathBuf>,
    pub merged_rows: u64,
}

pub struct RoutePairBatch {
    request: BatchRequest,
    engine: Arc<dyn RoutingEngine>,
    sink: Arc<dyn EventSink>,
    cancel: Arc<AtomicBool>,
}

/// 入力テーブルを読む。存在しないファイルは入力エラー。
fn load_input(label: &str, path: &Path) -> Result<Table> {
    match table::read_table(path) {
        Ok(t) => Ok(t),
        Err(TableError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(BatchError::InvalidInput(format!(
                "Input dataset {} for {label} does not exist.",
                path.display()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

fn table_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl RoutePairBatch {
    pub fn new(request: BatchRequest, engine: Arc<dyn RoutingEngine>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            request,
            engine,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ctrl-C などで立てられるキャンセルフラグを差し替える
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self) -> Result<BatchOutcome> {
        let req = &self.request;
        if req.max_processes == 0 {
            return Err(BatchError::InvalidConfiguration(
                "maximum number of parallel processes must be a positive integer".to_string(),
            ));
        }

        let origins = load_input("Origins", &req.origins)?;
        let destinations = load_input("Destinations", &req.destinations)?;
        let barriers = req
            .barriers
            .iter()
            .map(|p| -> Result<NamedTable> {
                Ok(NamedTable {
                    name: table_name(p),
                    table: load_input("Barriers", p)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let chunks = plan::plan(origins.len(), req.max_routes)?;
        let scratch = ScratchRoot::create(&req.scratch_folder)?;
        let inputs = JobInputs {
            origins,
            origin_id_field: req.origin_id_field.clone(),
            assigned_dest_field: req.assigned_dest_field.clone(),
            destinations,
            dest_id_field: req.dest_id_field.clone(),
            barriers,
        };
        let ctx = Arc::new(JobContext::new(
            inputs,
            req.settings.clone(),
            req.config.clone(),
            Arc::clone(&self.engine),
            scratch,
        )?);
        self.report_transfer_fields(&ctx);

        let outcome = self.execute(&ctx, &chunks);
        if outcome.is_err() {
            // 実行中のジョブが残っていても以後は書き出させない
            ctx.scratch.abandon(ctx.config.cleanup, self.sink.as_ref());
        }
        outcome
    }

    fn report_transfer_fields(&self, ctx: &JobContext) {
        let tf = &ctx.transfer_fields;
        if !tf.origin.is_empty() {
            self.sink.info(&format!(
                "Supported fields in the input Origins table that will be used in the analysis: {:?}",
                tf.origin
            ));
        }
        if !tf.destination.is_empty() {
            self.sink.info(&format!(
                "Supported fields in the input Destinations table that will be used in the analysis: {:?}",
                tf.destination
            ));
        }
    }

    fn execute(&self, ctx: &Arc<JobContext>, chunks: &[plan::Chunk]) -> Result<BatchOutcome> {
        let sink = self.sink.as_ref();
        preflight::validate(ctx, &self.sink)?;

        let workers = self.request.max_processes.min(chunks.len()).max(1);
        let state = {
            let mut scheduler: ThreadPoolScheduler<JobTask, JobOutcome> =
                ThreadPoolScheduler::new(workers, Arc::clone(&self.cancel));
            dispatch::run_all(chunks, ctx, &mut scheduler, sink)?
        };

        let summary = merge::merge(&state.succeeded_outputs, &self.request.out_routes, sink)?;

        let policy = ctx.config.cleanup;
        if policy == CleanupPolicy::PerJob {
            for result in state.results.iter().filter(|r| r.succeeded) {
                ctx.scratch
                    .cleanup(CleanupTarget::Job(result.scratch_dir.clone()), sink);
            }
        }
        ctx.scratch.release(policy, sink);
        sink.info("Finished calculating Routes.");

        Ok(BatchOutcome {
            total_chunks: chunks.len(),
            succeeded_chunks: state.succeeded_outputs.len(),
            failed_chunks: state.failed,
            merged_rows: summary.as_ref().map_or(0, |s| s.rows),
            combined_output: summary.map(|s| s.path),
        })
    }
}
