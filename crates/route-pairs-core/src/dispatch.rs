//! チャンクごとのジョブを並列実行して結果を集める

use std::sync::Arc;

use crate::error::{BatchError, Result};
use crate::event::EventSink;
use crate::job::{JobContext, JobResult, JobUnit, OutputLocation};
use crate::plan::Chunk;
use crate::scheduler::{TaskError, TaskScheduler};
use crate::scratch::{CleanupPolicy, CleanupTarget};

/// ワーカーが返す値。`Err` はジョブを組み立てられなかった致命的エラー。
pub type JobOutcome = Result<JobResult>;
pub type JobTask = Box<dyn FnOnce() -> JobOutcome + Send + 'static>;

/// ディスパッチの進捗と集計。コーディネータスレッドだけが更新する。
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    pub completed: usize,
    pub total: usize,
    pub succeeded_outputs: Vec<OutputLocation>,
    pub failed: usize,
    /// 受け取った順の全結果
    pub results: Vec<JobResult>,
}

impl BatchState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, result: JobResult) {
        match &result.output {
            Some(output) if result.succeeded => self.succeeded_outputs.push(output.clone()),
            _ => self.failed += 1,
        }
        self.results.push(result);
    }
}

/// 1 チャンク分のタスクを作る
pub fn job_task(ctx: &Arc<JobContext>, chunk: Chunk) -> JobTask {
    let ctx = Arc::clone(ctx);
    Box::new(move || {
        let job = JobUnit::new(ctx)?;
        Ok(job.run(chunk))
    })
}

/// 全チャンクをチャンク順に投入し、完了順に結果を集める。
///
/// 失敗したジョブ（`succeeded == false`）はバッチを止めない。ワーカーの
/// panic や結果を受け取れなかった場合は残りのジョブを放棄してエラーを返す。
pub fn run_all<S>(
    chunks: &[Chunk],
    ctx: &Arc<JobContext>,
    scheduler: &mut S,
    sink: &dyn EventSink,
) -> Result<BatchState>
where
    S: TaskScheduler<JobTask, JobOutcome> + ?Sized,
{
    let mut state = BatchState::new(chunks.len());
    for &chunk in chunks {
        scheduler.submit(job_task(ctx, chunk));
    }

    while let Some(completion) = scheduler.next_completion() {
        let outcome = match completion {
            Ok(outcome) => outcome,
            Err(TaskError::Cancelled) => {
                sink.warning("Route calculation was cancelled.");
                return Err(BatchError::Cancelled);
            }
            Err(e) => {
                sink.error("Failed to get Route result from parallel processing.");
                sink.error(&e.to_string());
                return Err(BatchError::WorkerTransport(e.to_string()));
            }
        };
        state.completed += 1;
        sink.info(&format!(
            "Finished Route calculation {} of {}.",
            state.completed, state.total
        ));
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                sink.error(&e.to_string());
                return Err(e);
            }
        };

        if !result.succeeded {
            // 解なしは正当な結果。詳細はジョブのログにある。
            sink.debug(&format!("Solve failed for job id {}.", result.job_id));
            sink.debug(&format!("{:?}", result.messages));
            if ctx.config.cleanup == CleanupPolicy::PerJob {
                ctx.scratch
                    .cleanup(CleanupTarget::Job(result.scratch_dir.clone()), sink);
            }
        }
        state.record(result);
    }

    Ok(state)
}
