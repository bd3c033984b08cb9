//! チャンク分割

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

/// 入力テーブルの 1 始まり・両端含む行範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub low: usize,
    pub high: usize,
}

impl Chunk {
    pub fn new(low: usize, high: usize) -> Self {
        debug_assert!(low <= high, "chunk bounds out of order: {low} > {high}");
        Self { low, high }
    }

    pub fn row_count(&self) -> usize {
        self.high - self.low + 1
    }

    /// `Routes_{low}_{high}` のような出力名の接尾辞
    pub fn suffix(&self) -> String {
        format!("{}_{}", self.low, self.high)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// `total_rows` 行を `max_chunk_size` 以下の連続区間に分割する。
///
/// `total_rows == 0` は空列（何もしない）であってエラーではない。
pub fn plan(total_rows: usize, max_chunk_size: usize) -> Result<Vec<Chunk>> {
    if max_chunk_size == 0 {
        return Err(BatchError::InvalidConfiguration(
            "maximum chunk size must be a positive integer".to_string(),
        ));
    }
    let count = total_rows.div_ceil(max_chunk_size);
    let mut chunks = Vec::with_capacity(count);
    let mut low = 1;
    while low <= total_rows {
        let high = total_rows.min(low + max_chunk_size - 1);
        chunks.push(Chunk::new(low, high));
        low = high + 1;
    }
    Ok(chunks)
}
