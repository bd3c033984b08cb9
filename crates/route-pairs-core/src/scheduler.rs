//! 汎用タスクスケジューラ
//!
//! ワーカースレッドが crossbeam-channel からチケットを取り出して実行し、
//! 結果を完了順に返す。`None` チケットが停止の合図。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{self as chan, RecvTimeoutError};
use thiserror::Error;

/// キャンセルフラグを確認する間隔
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("worker channel disconnected")]
    Disconnected,
    #[error("cancelled")]
    Cancelled,
}

pub trait TaskScheduler<T, R> {
    fn submit(&mut self, task: T);

    /// 次に完了したタスクの結果。未完了のタスクが無ければ `None`。
    fn next_completion(&mut self) -> Option<Result<R, TaskError>>;

    /// 投入済みで結果を受け取っていないタスク数
    fn pending(&self) -> usize;
}

/// `worker_limit` 本の OS スレッドで `FnOnce() -> R` を実行するスケジューラ
pub struct ThreadPoolScheduler<T, R> {
    ticket_tx: chan::Sender<Option<T>>,
    result_rx: chan::Receiver<Result<R, TaskError>>,
    handles: Vec<JoinHandle<()>>,
    abandon: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    pending: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn worker_main<T, R>(
    rx: chan::Receiver<Option<T>>,
    tx: chan::Sender<Result<R, TaskError>>,
    abandon: Arc<AtomicBool>,
) where
    T: FnOnce() -> R,
{
    while let Ok(Some(task)) = rx.recv() {
        if abandon.load(Ordering::Relaxed) {
            break;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(task))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
        if tx.send(result).is_err() {
            break;
        }
    }
}

impl<T, R> ThreadPoolScheduler<T, R>
where
    T: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    /// `cancel` が立つと `next_completion` は `TaskError::Cancelled` を返す
    pub fn new(worker_limit: usize, cancel: Arc<AtomicBool>) -> Self {
        let (ticket_tx, ticket_rx) = chan::unbounded::<Option<T>>();
        let (result_tx, result_rx) = chan::unbounded::<Result<R, TaskError>>();
        let abandon = Arc::new(AtomicBool::new(false));

        let handles = (0..worker_limit.max(1))
            .map(|_| {
                let rx = ticket_rx.clone();
                let tx = result_tx.clone();
                let ab = abandon.clone();
                thread::spawn(move || worker_main(rx, tx, ab))
            })
            .collect();
        // 呼び出し側は result_tx を持たないので drop
        drop(result_tx);

        Self {
            ticket_tx,
            result_rx,
            handles,
            abandon,
            cancel,
            pending: 0,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl<T, R> TaskScheduler<T, R> for ThreadPoolScheduler<T, R>
where
    T: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    fn submit(&mut self, task: T) {
        // 受信側はワーカーが持っているので、全滅していない限り失敗しない
        if self.ticket_tx.send(Some(task)).is_ok() {
            self.pending += 1;
        }
    }

    fn next_completion(&mut self) -> Option<Result<R, TaskError>> {
        loop {
            if self.pending == 0 {
                return None;
            }
            if self.cancel.load(Ordering::Relaxed) {
                return Some(Err(TaskError::Cancelled));
            }
            match self.result_rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => {
                    self.pending -= 1;
                    return Some(result);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.pending = 0;
                    return Some(Err(TaskError::Disconnected));
                }
            }
        }
    }

    fn pending(&self) -> usize {
        self.pending
    }
}

impl<T, R> Drop for ThreadPoolScheduler<T, R> {
    fn drop(&mut self) {
        let abandoned = self.pending > 0;
        if abandoned {
            self.abandon.store(true, Ordering::Relaxed);
        }
        for _ in 0..self.handles.len() {
            let _ = self.ticket_tx.send(None);
        }
        // 実行中のタスクは待たない
        if !abandoned {
            for h in self.handles.drain(..) {
                let _ = h.join();
            }
        }
    }
}
