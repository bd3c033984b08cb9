//! 大量の起点 / 割当終点ペアのルート計算をチャンクに分けて並列実行する
//!
//! 起点テーブルを上限サイズ以下の連続区間に分割し、区間ごとのジョブを
//! ワーカープールで解き、成功した出力だけをチャンク順にマージする。
//! ルート計算そのものは [`engine::RoutingEngine`] の実装に任せる。

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod fields;
pub mod job;
pub mod merge;
pub mod plan;
pub mod preflight;
pub mod properties;
pub mod scheduler;
pub mod scratch;
pub mod settings;
pub mod table;

pub use batch::{BatchOutcome, BatchRequest, RoutePairBatch};
pub use config::BatchConfig;
pub use error::{BatchError, Result};
pub use event::{EventSink, LogSink, MemorySink, Severity};
pub use plan::{Chunk, plan};
