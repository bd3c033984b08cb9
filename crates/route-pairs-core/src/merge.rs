//! 成功したチャンクの出力を 1 つのテーブルにまとめる

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{BatchError, Result};
use crate::event::EventSink;
use crate::job::OutputLocation;
use crate::table::{Schema, Table, TableError, TableWriter, read_schema, read_table};

pub const ALL_SOLVES_FAILED: &str = "All Route solves failed, so no output was produced.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub path: PathBuf,
    pub rows: u64,
    pub inputs: usize,
}

/// 出力をチャンク順に並べ、先頭のスキーマをテンプレートとして全行を追記する。
///
/// 後続の出力はテンプレートのフィールド名で射影する。テンプレートに
/// あるフィールドが欠けていればエラー。書き込みは隣の一時ファイルに行い、
/// 全出力を書き終えてから `destination` に rename する。失敗時は何も残らない。
pub fn merge(
    outputs: &[OutputLocation],
    destination: &Path,
    sink: &dyn EventSink,
) -> Result<Option<MergeSummary>> {
    let mut sorted = outputs.to_vec();
    sorted.sort();
    let Some((first, rest)) = sorted.split_first() else {
        sink.warning(ALL_SOLVES_FAILED);
        return Ok(None);
    };

    sink.info("Post-processing Route results...");
    let template = read_schema(&first.path)?;
    // 書き始める前に全出力のスキーマを確認する
    for loc in rest {
        let schema = read_schema(&loc.path)?;
        projection(&template, &schema, &loc.path)?;
    }

    let rows = if is_stdout(destination) {
        write_merged(&sorted, &template, destination)?
    } else {
        let partial = partial_path(destination);
        match write_merged(&sorted, &template, &partial) {
            Ok(rows) => {
                std::fs::rename(&partial, destination).map_err(|source| {
                    remove_partial(&partial, sink);
                    BatchError::Resource {
                        path: destination.to_path_buf(),
                        source,
                    }
                })?;
                rows
            }
            Err(e) => {
                remove_partial(&partial, sink);
                return Err(e);
            }
        }
    };

    sink.debug(&format!(
        "Merged {rows} rows from {} outputs into {}",
        sorted.len(),
        destination.display()
    ));
    Ok(Some(MergeSummary {
        path: destination.to_path_buf(),
        rows,
        inputs: sorted.len(),
    }))
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// `dir/.partial.<name>`。拡張子（`.gz` 判定）は元のまま残る。
fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".partial.{name}"))
}

fn remove_partial(partial: &Path, sink: &dyn EventSink) {
    match std::fs::remove_file(partial) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => sink.warning(&format!(
            "Unable to delete partial output {}: {e}",
            partial.display()
        )),
    }
}

fn write_merged(sorted: &[OutputLocation], template: &Schema, path: &Path) -> Result<u64> {
    let mut writer = TableWriter::create(path, template)?;
    for loc in sorted {
        let table = read_table(&loc.path)?;
        let idx = projection(template, &table.schema, &loc.path)?;
        append_projected(&mut writer, &idx, &table)?;
    }
    Ok(writer.finish()?)
}

/// テンプレートの各フィールドが `schema` のどの列にあたるか
fn projection(template: &Schema, schema: &Schema, path: &Path) -> Result<Vec<usize>> {
    template
        .names()
        .map(|name| {
            schema.index_of(name).ok_or_else(|| {
                BatchError::Table(TableError::MissingField {
                    table: path.display().to_string(),
                    field: name.to_string(),
                })
            })
        })
        .collect()
}

fn append_projected(writer: &mut TableWriter, projection: &[usize], table: &Table) -> Result<()> {
    let mut projected: Vec<Value> = Vec::with_capacity(projection.len());
    for row in &table.rows {
        projected.clear();
        projected.extend(projection.iter().map(|&i| row[i].clone()));
        writer.append(&projected)?;
    }
    Ok(())
}
