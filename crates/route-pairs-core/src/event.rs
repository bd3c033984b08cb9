//! 進捗 / ログイベントのストリーム
//!
//! コアはグローバルな logger 状態に依存せず、`(severity, text)` を注入された
//! [`EventSink`] に流すだけにする。描画は外側（CLI の env_logger 等）の責務。

use std::fmt;
use std::sync::Mutex;

/// イベントの重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 1件のイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub severity: Severity,
    pub text: String,
}

/// イベントの受け口。
///
/// コーディネータスレッドからのみ呼ばれるが、`Arc<dyn EventSink>` で
/// 共有できるよう `Send + Sync` を要求する。
pub trait EventSink: Send + Sync {
    fn emit(&self, severity: Severity, text: &str);

    fn debug(&self, text: &str) {
        self.emit(Severity::Debug, text);
    }
    fn info(&self, text: &str) {
        self.emit(Severity::Info, text);
    }
    fn warning(&self, text: &str) {
        self.emit(Severity::Warning, text);
    }
    fn error(&self, text: &str) {
        self.emit(Severity::Error, text);
    }
}

/// `log` facade に転送する sink。
pub struct LogSink;

pub const LOG_TARGET: &str = "route_pairs";

impl EventSink for LogSink {
    fn emit(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Debug => log::debug!(target: LOG_TARGET, "{text}"),
            Severity::Info => log::info!(target: LOG_TARGET, "{text}"),
            Severity::Warning => log::warn!(target: LOG_TARGET, "{text}"),
            Severity::Error => log::error!(target: LOG_TARGET, "{text}"),
            // log crate に CRITICAL レベルは無いので error に寄せて接頭辞で区別する
            Severity::Critical => log::error!(target: LOG_TARGET, "CRITICAL: {text}"),
        }
    }
}

/// メモリに貯めるだけの sink（テスト用）
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 指定 severity のイベント本文だけを取り出す
    pub fn texts(&self, severity: Severity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.severity == severity)
            .map(|e| e.text)
            .collect()
    }

    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.events().iter().any(|e| e.severity == severity && e.text.contains(needle))
    }
}

impl EventSink for MemorySink {
    fn emit(&self, severity: Severity, text: &str) {
        let event = Event {
            severity,
            text: text.to_string(),
        };
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
