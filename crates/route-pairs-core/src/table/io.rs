//! テーブルファイルの入出力（gzip対応）
//!
//! 1行目がスキーマ `{"fields":[...]}`、2行目以降が 1 行 = 1 JSON 配列。

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{Schema, Table, TableError};

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_gz(p: &Path) -> bool {
    p.extension().and_then(|e| e.to_str()).unwrap_or_default().eq_ignore_ascii_case("gz")
}

pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gz(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Stdout(std::io::Stdout),
    Gz(flate2::write::GzEncoder<BufWriter<File>>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Stdout(s) => s.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Stdout(s) => s.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    /// Finalize the stream and flush underlying file/stdout.
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            Writer::Stdout(mut s) => s.flush(),
            Writer::Gz(e) => {
                let mut f = e.finish()?;
                f.flush()
            }
        }
    }
}

/// 出力先を開く。親ディレクトリが無ければ作る。
pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Writer::Stdout(std::io::stdout()));
    }
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    create_file_writer(p)
}

fn create_file_writer(p: &Path) -> io::Result<Writer> {
    let f = File::create(p)?;
    if is_gz(p) {
        let enc = flate2::write::GzEncoder::new(BufWriter::new(f), flate2::Compression::default());
        return Ok(Writer::Gz(enc));
    }
    Ok(Writer::Plain(BufWriter::new(f)))
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TableError + '_ {
    move |source| TableError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// テーブルファイル全体を読み込む。空行は読み飛ばす。
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Table, TableError> {
    let p = path.as_ref();
    let reader = open_reader(p).map_err(io_err(p))?;
    let mut schema: Option<Schema> = None;
    let mut rows = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(p))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parse_err = |source| TableError::Parse {
            path: p.to_path_buf(),
            line: idx + 1,
            source,
        };
        let Some(width) = schema.as_ref().map(Schema::len) else {
            schema = Some(serde_json::from_str(line).map_err(parse_err)?);
            continue;
        };
        let row: Vec<Value> = serde_json::from_str(line).map_err(parse_err)?;
        if row.len() != width {
            return Err(TableError::RowWidth {
                expected: width,
                found: row.len(),
            });
        }
        rows.push(row);
    }

    let schema = schema.ok_or_else(|| TableError::MissingHeader {
        path: p.to_path_buf(),
    })?;
    Ok(Table { schema, rows })
}

/// 先頭のスキーマ行だけを読む
pub fn read_schema<P: AsRef<Path>>(path: P) -> Result<Schema, TableError> {
    let p = path.as_ref();
    let reader = open_reader(p).map_err(io_err(p))?;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(p))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        return serde_json::from_str(line).map_err(|source| TableError::Parse {
            path: p.to_path_buf(),
            line: idx + 1,
            source,
        });
    }
    Err(TableError::MissingHeader {
        path: p.to_path_buf(),
    })
}

/// スキーマを先に書き、行を追記していくライター
pub struct TableWriter {
    path: PathBuf,
    width: usize,
    writer: Writer,
    rows_written: u64,
}

impl TableWriter {
    /// `schema` をテンプレートとして出力先を作成する（既存ファイルは上書き）
    pub fn create<P: AsRef<Path>>(path: P, schema: &Schema) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let writer = open_writer(&path).map_err(io_err(&path))?;
        Self::start(path, writer, schema)
    }

    /// 親ディレクトリを作らずに出力先を作成する。親が消えていれば `Io` エラー。
    pub fn create_in_existing_dir<P: AsRef<Path>>(path: P, schema: &Schema) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let writer = create_file_writer(&path).map_err(io_err(&path))?;
        Self::start(path, writer, schema)
    }

    fn start(path: PathBuf, mut writer: Writer, schema: &Schema) -> Result<Self, TableError> {
        serde_json::to_writer(&mut writer, schema).map_err(|e| TableError::Io {
            path: path.clone(),
            source: e.into(),
        })?;
        writer.write_all(b"\n").map_err(io_err(&path))?;
        Ok(Self {
            width: schema.len(),
            path,
            writer,
            rows_written: 0,
        })
    }

    pub fn append(&mut self, row: &[Value]) -> Result<(), TableError> {
        if row.len() != self.width {
            return Err(TableError::RowWidth {
                expected: self.width,
                found: row.len(),
            });
        }
        serde_json::to_writer(&mut self.writer, row).map_err(|e| TableError::Io {
            path: self.path.clone(),
            source: e.into(),
        })?;
        self.writer.write_all(b"\n").map_err(io_err(&self.path))?;
        self.rows_written += 1;
        Ok(())
    }

    /// 書き込みを確定し、書いた行数を返す
    pub fn finish(self) -> Result<u64, TableError> {
        let Self {
            path,
            writer,
            rows_written,
            ..
        } = self;
        writer.close().map_err(io_err(&path))?;
        Ok(rows_written)
    }
}

pub fn write_table<P: AsRef<Path>>(path: P, table: &Table) -> Result<u64, TableError> {
    write_rows(TableWriter::create(path, &table.schema)?, table)
}

/// 既存ディレクトリの中にだけ書く `write_table`
pub fn write_table_in_existing_dir<P: AsRef<Path>>(path: P, table: &Table) -> Result<u64, TableError> {
    write_rows(TableWriter::create_in_existing_dir(path, &table.schema)?, table)
}

fn write_rows(mut w: TableWriter, table: &Table) -> Result<u64, TableError> {
    for row in &table.rows {
        w.append(row)?;
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Field, FieldType};
    use serde_json::json;

    fn sample() -> Table {
        let mut t = Table::new(Schema::new(vec![
            Field::new("ID", FieldType::Integer),
            Field::new("SHAPE", FieldType::Geometry),
        ]));
        t.push_row(vec![json!(1), json!({"x": 1.0, "y": 2.0})]).unwrap();
        t.push_row(vec![json!(2), Value::Null]).unwrap();
        t
    }

    #[test]
    fn plain_and_gz_files_read_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample();
        for name in ["t.jsonl", "t.jsonl.gz"] {
            let path = dir.path().join(name);
            assert_eq!(write_table(&path, &table).unwrap(), 2);
            assert_eq!(read_table(&path).unwrap(), table, "{name}");
        }
    }

    #[test]
    fn writer_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("out.jsonl");
        write_table(&path, &sample()).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn read_rejects_rows_of_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(
            &path,
            "{\"fields\":[{\"name\":\"ID\",\"type\":\"Integer\"}]}\n[1]\n[2,3]\n",
        )
        .unwrap();
        let err = read_table(&path).unwrap_err();
        assert!(matches!(err, TableError::RowWidth { expected: 1, found: 2 }));
    }

    #[test]
    fn read_reports_missing_header_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.jsonl");
        std::fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(read_table(&empty).unwrap_err(), TableError::MissingHeader { .. }));

        let broken = dir.path().join("broken.jsonl");
        std::fs::write(&broken, "{\"fields\":[]}\nnot json\n").unwrap();
        match read_table(&broken).unwrap_err() {
            TableError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn existing_dir_writer_does_not_create_parents() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("job").join("output").join("Routes_1_1.jsonl");
        let err = write_table_in_existing_dir(&gone, &sample()).unwrap_err();
        assert!(matches!(err, TableError::Io { .. }));
        assert!(!dir.path().join("job").exists());

        let here = dir.path().join("Routes_1_1.jsonl");
        assert_eq!(write_table_in_existing_dir(&here, &sample()).unwrap(), 2);
        assert_eq!(read_table(&here).unwrap(), sample());
    }

    #[test]
    fn table_writer_rejects_wrong_width_and_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.jsonl");
        let table = sample();
        let mut w = TableWriter::create(&path, &table.schema).unwrap();
        w.append(&table.rows[0]).unwrap();
        assert!(w.append(&[json!(1)]).is_err());
        assert_eq!(w.finish().unwrap(), 1);
        assert_eq!(read_table(&path).unwrap().len(), 1);
    }
}
