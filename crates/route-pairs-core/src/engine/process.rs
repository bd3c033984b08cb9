//! 外部ソルバプロセスを JSON lines で駆動するエンジンアダプタ
//!
//! 1 セッション = 1 子プロセス。要求は stdin に 1 行 1 JSON で書き、
//! 応答は読み取りスレッド経由で受け取る。

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    BarrierKind, EngineError, RouteResultSet, RouteSession, RoutingEngine, SolveOutcome, Stop,
};
use crate::properties::PropertyMap;
use crate::settings::NetworkSource;
use crate::table::Table;

pub const SOLVER_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const SOLVER_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// ソルバプロセス起動時の設定
#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// 応答待ちの上限。`None` なら無期限に待つ。
    pub reply_timeout: Option<Duration>,
}

/// ソルバへの要求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    Init { network: String },
    Set { name: String, value: Value },
    Solve { stops: Vec<Stop>, barriers: Vec<BarrierSet> },
    Quit,
}

/// ソルバからの応答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
    Ready {
        #[serde(default)]
        defaults: PropertyMap,
    },
    Ok,
    Solved {
        succeeded: bool,
        #[serde(default)]
        messages: Vec<String>,
        #[serde(default)]
        routes: Option<Table>,
        #[serde(default)]
        stops: Option<Table>,
    },
    Error {
        message: String,
    },
}

/// 種別付きのバリアテーブル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierSet {
    pub kind: BarrierKind,
    pub table: Table,
}

pub struct ProcessEngine {
    config: ProcessEngineConfig,
    network: NetworkSource,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig, network: NetworkSource) -> Self {
        Self { config, network }
    }
}

impl RoutingEngine for ProcessEngine {
    fn open_session(&self) -> Result<Box<dyn RouteSession>, EngineError> {
        let session = ProcessSession::spawn(&self.config, &self.network)?;
        Ok(Box::new(session))
    }
}

/// 1 本のソルバプロセスに対する入出力をカプセル化する。
pub struct ProcessSession {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    reply_timeout: Option<Duration>,
    defaults: PropertyMap,
    stops: Vec<Stop>,
    barriers: Vec<BarrierSet>,
}

impl ProcessSession {
    pub fn spawn(cfg: &ProcessEngineConfig, network: &NetworkSource) -> Result<Self, EngineError> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: cfg.path.display().to_string(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("no stdout".to_string()))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut session = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            reply_timeout: cfg.reply_timeout,
            defaults: PropertyMap::new(),
            stops: Vec::new(),
            barriers: Vec::new(),
        };
        session.initialize(network)?;
        Ok(session)
    }

    fn initialize(&mut self, network: &NetworkSource) -> Result<(), EngineError> {
        let reply = self.request(&Request::Init {
            network: network.as_str().to_string(),
        })?;
        match reply {
            Reply::Ready { defaults } => {
                self.defaults = defaults;
                Ok(())
            }
            Reply::Error { message } => Err(EngineError::Rejected(message)),
            other => Err(unexpected("ready", &other)),
        }
    }

    fn request(&mut self, req: &Request) -> Result<Reply, EngineError> {
        let line = serde_json::to_string(req)
            .map_err(|e| EngineError::Protocol(format!("failed to encode request: {e}")))?;
        self.write_line(&line)?;
        let reply = self.recv_line()?;
        serde_json::from_str(&reply)
            .map_err(|e| EngineError::Protocol(format!("malformed reply '{reply}': {e}")))
    }

    fn recv_line(&self) -> Result<String, EngineError> {
        loop {
            let line = match self.reply_timeout {
                Some(timeout) => self.rx.recv_timeout(timeout).map_err(|e| match e {
                    RecvTimeoutError::Timeout => EngineError::Timeout(timeout),
                    RecvTimeoutError::Disconnected => EngineError::Closed,
                })?,
                None => self.rx.recv().map_err(|_| EngineError::Closed)?,
            };
            // 空行は無視
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
    }

    fn write_line(&mut self, msg: &str) -> Result<(), EngineError> {
        self.stdin.write_all(msg.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }
}

fn unexpected(expected: &str, got: &Reply) -> EngineError {
    EngineError::Protocol(format!("expected '{expected}' reply, got {got:?}"))
}

impl RouteSession for ProcessSession {
    fn default_properties(&self) -> PropertyMap {
        self.defaults.clone()
    }

    fn set_property(&mut self, name: &str, value: &Value) -> Result<(), EngineError> {
        let reply = self.request(&Request::Set {
            name: name.to_string(),
            value: value.clone(),
        })?;
        match reply {
            Reply::Ok => Ok(()),
            Reply::Error { message } => Err(EngineError::Rejected(message)),
            other => Err(unexpected("ok", &other)),
        }
    }

    fn insert_stops(&mut self, stops: Vec<Stop>) -> Result<(), EngineError> {
        self.stops.extend(stops);
        Ok(())
    }

    fn stop_count(&self) -> usize {
        self.stops.len()
    }

    fn load_barriers(&mut self, kind: BarrierKind, barriers: &Table) -> Result<(), EngineError> {
        self.barriers.push(BarrierSet {
            kind,
            table: barriers.clone(),
        });
        Ok(())
    }

    fn solve(&mut self) -> Result<SolveOutcome, EngineError> {
        let reply = self.request(&Request::Solve {
            stops: self.stops.clone(),
            barriers: self.barriers.clone(),
        })?;
        match reply {
            Reply::Solved {
                succeeded,
                messages,
                routes,
                stops,
            } => {
                let result = match (routes, stops) {
                    (Some(routes), Some(stops)) => Some(RouteResultSet { routes, stops }),
                    _ => None,
                };
                if succeeded && result.is_none() {
                    return Err(EngineError::Protocol(
                        "solved reply without routes/stops tables".to_string(),
                    ));
                }
                Ok(SolveOutcome {
                    succeeded,
                    messages,
                    result,
                })
            }
            Reply::Error { message } => Err(EngineError::Rejected(message)),
            other => Err(unexpected("solved", &other)),
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if let Ok(line) = serde_json::to_string(&Request::Quit) {
            let _ = self.write_line(&line);
        }
        let deadline = Instant::now() + SOLVER_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(SOLVER_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
