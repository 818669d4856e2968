// File-system data partitioners: plain lines and JSON lines

use async_trait::async_trait;
use jobstore_core::domain::{JobSpecification, RecordInfo};
use jobstore_core::error::{AppError, Result};
use jobstore_core::port::{DataPartitioner, PartitionError, PartitionResult, PartitionerFactory};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Packaging value selecting the plain line partitioner
pub const LINE_PACKAGING: &str = "lin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Latin1,
}

impl Charset {
    fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "utf8" => Ok(Charset::Utf8),
            "latin1" | "iso88591" => Ok(Charset::Latin1),
            _ => Err(AppError::Validation(format!("Unsupported charset: {}", name))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string()),
            Charset::Latin1 => Ok(bytes.iter().map(|b| char::from(*b)).collect()),
        }
    }
}

/// One decoded line; `terminated` is false for a last line without newline
struct Line {
    text: std::result::Result<String, String>,
    terminated: bool,
}

/// Non-empty lines of a reader, numbered from 0
struct Lines {
    reader: Box<dyn BufRead + Send>,
    charset: Charset,
    position: u64,
    failed: bool,
}

impl Lines {
    fn new(reader: Box<dyn BufRead + Send>, charset: Charset) -> Self {
        Self {
            reader,
            charset,
            position: 0,
            failed: false,
        }
    }

    fn next_line(&mut self) -> Option<std::result::Result<(u64, Line), PartitionError>> {
        if self.failed {
            return None;
        }
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(PartitionError::PrematureEndOfData(e.to_string())));
                }
            }
            let terminated = buf.last() == Some(&b'\n');
            let content = trim_line_end(&buf);
            if content.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let position = self.position;
            self.position += 1;
            let line = Line {
                text: self.charset.decode(content),
                terminated,
            };
            return Some(Ok((position, line)));
        }
    }

    fn fail(
        &mut self,
        message: String,
    ) -> Option<std::result::Result<PartitionResult, PartitionError>> {
        self.failed = true;
        Some(Err(PartitionError::PrematureEndOfData(message)))
    }
}

fn trim_line_end(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &buf[..end]
}

/// Every non-empty line is a record without record info
pub struct LinePartitioner {
    lines: Lines,
}

impl LinePartitioner {
    fn new(reader: Box<dyn BufRead + Send>, charset: Charset) -> Self {
        Self {
            lines: Lines::new(reader, charset),
        }
    }
}

impl Iterator for LinePartitioner {
    type Item = std::result::Result<PartitionResult, PartitionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (position, line) = match self.lines.next_line()? {
            Ok(next) => next,
            Err(e) => return Some(Err(e)),
        };
        Some(match line.text {
            Ok(data) => Ok(PartitionResult {
                data,
                record_info: None,
                position,
            }),
            Err(message) => Err(PartitionError::InvalidData { position, message }),
        })
    }
}

/// One JSON object per line; `id`, `parentId` and `agencyId` become record info
pub struct JsonLinesPartitioner {
    lines: Lines,
}

impl JsonLinesPartitioner {
    fn new(reader: Box<dyn BufRead + Send>, charset: Charset) -> Self {
        Self {
            lines: Lines::new(reader, charset),
        }
    }
}

fn string_field(object: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    match object.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn record_info(value: &Value) -> std::result::Result<Option<RecordInfo>, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "record is not a JSON object".to_string())?;
    let Some(id) = string_field(object, "id") else {
        return Ok(None);
    };
    let agency_id = match object.get("agencyId") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| format!("invalid agencyId: {}", v))?,
        ),
    };
    Ok(Some(RecordInfo {
        id,
        parent_id: string_field(object, "parentId"),
        agency_id,
    }))
}

impl Iterator for JsonLinesPartitioner {
    type Item = std::result::Result<PartitionResult, PartitionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (position, line) = match self.lines.next_line()? {
            Ok(next) => next,
            Err(e) => return Some(Err(e)),
        };
        let parsed = line.text.and_then(|data| {
            let value: Value = serde_json::from_str(&data).map_err(|e| e.to_string())?;
            let info = record_info(&value)?;
            Ok((data, info))
        });
        match parsed {
            Ok((data, record_info)) => Some(Ok(PartitionResult {
                data,
                record_info,
                position,
            })),
            // a broken last line without newline means the file was cut short
            Err(message) if !line.terminated => self
                .lines
                .fail(format!("truncated record at position {}: {}", position, message)),
            Err(message) => Some(Err(PartitionError::InvalidData { position, message })),
        }
    }
}

/// Opens data files below a base directory
pub struct FileSystemPartitionerFactory {
    base_dir: PathBuf,
}

impl FileSystemPartitionerFactory {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, data_file: &str) -> Result<PathBuf> {
        let relative = Path::new(data_file);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if data_file.is_empty() || escapes {
            return Err(AppError::Validation(format!(
                "Data file must be a relative path below the data directory: {}",
                data_file
            )));
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl PartitionerFactory for FileSystemPartitionerFactory {
    async fn open(&self, specification: &JobSpecification) -> Result<Box<dyn DataPartitioner>> {
        let charset = Charset::parse(&specification.charset)?;
        let path = self.resolve(&specification.data_file)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("Data file {}", path.display()))
            }
            _ => AppError::Io(e),
        })?;
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(file));

        debug!(path = %path.display(), packaging = %specification.packaging, "Opening data file");
        if specification.packaging.eq_ignore_ascii_case(LINE_PACKAGING) {
            Ok(Box::new(LinePartitioner::new(reader, charset)))
        } else {
            Ok(Box::new(JsonLinesPartitioner::new(reader, charset)))
        }
    }
}
