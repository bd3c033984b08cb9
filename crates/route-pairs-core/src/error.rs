//! バッチ全体のエラー分類

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;
use crate::table::TableError;

/// バッチを中断させるエラー。
///
/// チャンク単位の解なし（solve failure）はここに含まれない。
/// それは `JobResult::succeeded == false` として記録され、バッチは継続する。
#[derive(Debug, Error)]
pub enum BatchError {
    /// チャンクサイズ 0、単位名の不正など。ワーカー起動前に検出される。
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 入力テーブルが存在しない、空、または必須フィールドが欠けている。
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// pre-flight でソルバ設定の初期化に失敗した。
    #[error("solver configuration failed: {0}")]
    Configuration(String),

    /// ワーカーが panic した、または結果を受け取れなかった。
    #[error("failed to get job result from parallel processing: {0}")]
    WorkerTransport(String),

    /// スクラッチディレクトリの作成に失敗した。
    #[error("failed to create scratch directory {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    /// オペレータによる中断（Ctrl-C）。in-flight のジョブは放棄される。
    #[error("batch cancelled")]
    Cancelled,
}

impl BatchError {
    pub(crate) fn configuration(err: EngineError) -> Self {
        BatchError::Configuration(err.to_string())
    }
}

pub type Result<T, E = BatchError> = std::result::Result<T, E>;
