//! バッチ設定ファイル（TOML）
//!
//! ```toml
//! cleanup = "per-job"
//! reply_timeout_secs = 600
//!
//! [solver_properties]
//! searchTolerance = 5000
//! searchToleranceUnits = "Meters"
//! returnDirections = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::properties::PropertyMap;
use crate::scratch::CleanupPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// ソルバに設定する静的プロパティ（呼び出し側制御のキーは無視される）
    pub solver_properties: PropertyMap,
    pub cleanup: CleanupPolicy,
    /// ソルバプロセスの応答待ち上限（秒）
    pub reply_timeout_secs: Option<u64>,
}

impl BatchConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| BatchError::InvalidConfiguration(format!("invalid config: {e}")))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BatchError::InvalidConfiguration(format!(
                "failed to read config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_secs.map(Duration::from_secs)
    }
}
