//! スクラッチディレクトリのライフサイクル
//!
//! `<root>/<job_id>/` をジョブごとに作り、ポリシーに従って削除する。
//! 削除はベストエフォートで冪等。存在しないディレクトリの削除は成功扱い、
//! それ以外の失敗は警告イベントに格下げする。

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::event::EventSink;

/// 中間出力の削除ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// 結果を取り込んだジョブから順に削除し、最後に空のルートも消す
    #[default]
    PerJob,
    /// バッチ終了時にルートごと削除する
    WholeBatch,
    /// 何も消さない（デバッグ用）
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupTarget {
    Job(PathBuf),
    Batch,
}

/// クローンは放棄フラグを共有する
#[derive(Debug, Clone)]
pub struct ScratchRoot {
    path: PathBuf,
    abandoned: Arc<AtomicBool>,
}

fn resource_err(path: &Path) -> impl FnOnce(io::Error) -> BatchError + '_ {
    move |source| BatchError::Resource {
        path: path.to_path_buf(),
        source,
    }
}

impl ScratchRoot {
    /// ルートを作成する（既存なら何もしない）
    pub fn create<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(resource_err(&path))?;
        Ok(Self {
            path,
            abandoned: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ジョブ専用ディレクトリを作る。同名が既にある、またはルートが
    /// 消えていればエラー。
    pub fn create_job_dir(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.path.join(job_id);
        std::fs::create_dir(&dir).map_err(resource_err(&dir))?;
        Ok(dir)
    }

    /// バッチが放棄されたか。放棄後のジョブは何も書き出さない。
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// 放棄フラグを立て、`keep` 以外ならルートごと削除する
    pub fn abandon(&self, policy: CleanupPolicy, sink: &dyn EventSink) {
        self.abandoned.store(true, Ordering::Release);
        if policy != CleanupPolicy::Keep {
            self.cleanup(CleanupTarget::Batch, sink);
        }
    }

    pub fn cleanup(&self, target: CleanupTarget, sink: &dyn EventSink) {
        let dir = match &target {
            CleanupTarget::Job(dir) => dir.as_path(),
            CleanupTarget::Batch => self.path.as_path(),
        };
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                sink.warning(&format!(
                    "Unable to delete intermediate Route output folder {}.",
                    dir.display()
                ));
                sink.debug(&e.to_string());
            }
        }
    }

    /// バッチ終了時の後始末
    pub fn release(&self, policy: CleanupPolicy, sink: &dyn EventSink) {
        match policy {
            CleanupPolicy::PerJob => {
                // 失敗ジョブのフォルダが残っていれば空ではないので消えない
                if let Err(e) = std::fs::remove_dir(&self.path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        sink.debug(&format!(
                            "Scratch folder {} was kept: {e}",
                            self.path.display()
                        ));
                    }
                }
            }
            CleanupPolicy::WholeBatch => {
                sink.info("Deleting intermediate outputs...");
                self.cleanup(CleanupTarget::Batch, sink);
            }
            CleanupPolicy::Keep => {
                sink.debug(&format!("Intermediate outputs kept in {}", self.path.display()));
            }
        }
    }
}
