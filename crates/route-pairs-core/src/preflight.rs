//! 並列実行前のソルバ設定検証
//!
//! 全ジョブが同じ理由で失敗するのを避けるため、捨てジョブを 1 つ作って
//! ソルバの初期化だけを行う。ジョブフォルダは結果に関わらず削除する。

use std::sync::Arc;

use crate::error::{BatchError, Result};
use crate::event::EventSink;
use crate::job::{JobContext, JobUnit};
use crate::scratch::CleanupTarget;

pub fn validate(ctx: &Arc<JobContext>, sink: &Arc<dyn EventSink>) -> Result<()> {
    sink.debug("Validating Route settings...");
    let mut job = JobUnit::with_forwarding(Arc::clone(ctx), Arc::clone(sink))?;
    let job_dir = job.scratch_dir().to_path_buf();
    let initialized = job.initialize_solver();
    // セッションとログを閉じてから消す
    drop(job);

    sink.debug("Deleting temporary test Route job folder...");
    ctx.scratch.cleanup(CleanupTarget::Job(job_dir), sink.as_ref());

    match initialized {
        Ok(()) => {
            sink.debug("Route settings successfully validated.");
            Ok(())
        }
        Err(e) => {
            sink.error("Error initializing Route analysis.");
            sink.error(&e.to_string());
            Err(BatchError::configuration(e))
        }
    }
}
