//! 结果表 - 基础设施层
//!
//! 结果表是续跑的唯一依据：其中的 `Filename` 集合就是"已处理"的集合。
//!
//! 磁盘上的文件要么不存在，要么是完整可读的表格。每次保存都先写临时文件，
//! 再原子替换；原子替换失败时会换用直接覆盖的方式再试。
//!
//! 同一个结果目录不支持多个进程同时写入，也不加文件锁。

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{AppResult, PersistenceError};
use crate::models::record::{DescriptionStatus, ImageRecord, COLUMNS};

/// 结果表的固定文件名
pub const STORE_FILE_NAME: &str = "descriptions.xlsx";

/// 单元格允许的最大字符数
const MAX_CELL_CHARS: usize = 32_767;

/// 写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// 写同目录临时文件后原子替换
    AtomicReplace,
    /// 直接覆盖目标文件
    Direct,
}

impl WriteStrategy {
    /// 按该方式写入一次
    pub fn write(self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            WriteStrategy::AtomicReplace => write_atomic(path, bytes),
            WriteStrategy::Direct => std::fs::write(path, bytes),
        }
    }
}

/// 保存时依次尝试的写入方式
pub const SAVE_STRATEGIES: [WriteStrategy; 3] = [
    WriteStrategy::AtomicReplace,
    WriteStrategy::AtomicReplace,
    WriteStrategy::Direct,
];

/// 结果表
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: Vec<ImageRecord>,
    known: HashSet<String>,
}

impl ResultStore {
    /// 结果目录对应的结果表路径
    pub fn path_for(results_dir: &Path) -> PathBuf {
        results_dir.join(STORE_FILE_NAME)
    }

    /// 打开结果表；文件不存在时返回空表
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            read_records(&path)?
        } else {
            Vec::new()
        };
        let known = records.iter().map(|r| r.filename.clone()).collect();

        debug!("结果表 {} 已有 {} 条记录", path.display(), records.len());

        Ok(Self {
            path,
            records,
            known,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 文件名是否已有记录
    pub fn contains(&self, filename: &str) -> bool {
        self.known.contains(filename)
    }

    /// 追加一条记录；同名记录已存在时返回 false 且不做修改
    pub fn push(&mut self, record: ImageRecord) -> bool {
        if !self.known.insert(record.filename.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// 把全部记录写回磁盘
    pub fn save(&self) -> Result<(), PersistenceError> {
        let bytes = encode_workbook(&self.records).map_err(|e| PersistenceError::SaveFailed {
            path: self.path.display().to_string(),
            attempts: 0,
            message: e.to_string(),
        })?;
        durable_write(&self.path, &bytes, &SAVE_STRATEGIES)
    }
}

/// 带有限次重试的持久写入
///
/// 按顺序尝试每种写入方式，第一次成功即返回。
pub fn durable_write(
    path: &Path,
    bytes: &[u8],
    strategies: &[WriteStrategy],
) -> Result<(), PersistenceError> {
    durable_write_with(path, bytes, strategies, WriteStrategy::write)
}

/// 同 [`durable_write`]，每次写入交给 `write` 执行
pub fn durable_write_with<F>(
    path: &Path,
    bytes: &[u8],
    strategies: &[WriteStrategy],
    mut write: F,
) -> Result<(), PersistenceError>
where
    F: FnMut(WriteStrategy, &Path, &[u8]) -> std::io::Result<()>,
{
    let mut last_error = String::from("no write strategy configured");

    for (attempt, strategy) in strategies.iter().enumerate() {
        let result = write(*strategy, path, bytes);

        match result {
            Ok(()) => {
                if attempt > 0 {
                    warn!(
                        "结果表在第 {} 次尝试时保存成功 ({:?})",
                        attempt + 1,
                        strategy
                    );
                }
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "保存结果表失败 (第 {} 次, {:?}): {}",
                    attempt + 1,
                    strategy,
                    e
                );
                last_error = e.to_string();
            }
        }
    }

    Err(PersistenceError::SaveFailed {
        path: path.display().to_string(),
        attempts: strategies.len(),
        message: last_error,
    })
}

/// 写同目录临时文件，然后原子替换目标文件
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// 把记录编码成 xlsx 字节
pub fn encode_workbook(records: &[ImageRecord]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Descriptions")?;

    for (col, name) in COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *name, &header)?;
    }

    for (idx, record) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        worksheet.write_string(row, 0, &record.filename)?;
        worksheet.write_string(row, 1, &record.format)?;
        worksheet.write_number(row, 2, record.width)?;
        worksheet.write_number(row, 3, record.height)?;
        worksheet.write_string(row, 4, &record.subject)?;
        worksheet.write_string(row, 5, &record.audience)?;
        worksheet.write_string(row, 6, clamp_cell(&record.description))?;
        worksheet.write_string(row, 7, &record.generated_at)?;
    }

    workbook.save_to_buffer()
}

fn clamp_cell(text: &str) -> String {
    if text.chars().count() > MAX_CELL_CHARS {
        text.chars().take(MAX_CELL_CHARS).collect()
    } else {
        text.to_string()
    }
}

/// 读取已有结果表
pub fn read_records(path: &Path) -> AppResult<Vec<ImageRecord>> {
    let load_failed = |message: String| PersistenceError::LoadFailed {
        path: path.display().to_string(),
        message,
    };
    let malformed = |message: String| PersistenceError::MalformedStore {
        path: path.display().to_string(),
        message,
    };

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e: calamine::XlsxError| load_failed(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| malformed("工作簿中没有工作表".to_string()))?
        .map_err(|e| load_failed(e.to_string()))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(|c| cell_text(Some(c))).collect(),
        None => return Ok(Vec::new()),
    };
    if header.len() < COLUMNS.len() || header[..COLUMNS.len()] != COLUMNS {
        return Err(malformed(format!("表头不匹配: {:?}", header)).into());
    }

    let mut records = Vec::new();
    for row in rows {
        let filename = cell_text(row.first());
        if filename.is_empty() {
            continue;
        }
        let description = cell_text(row.get(6));
        records.push(ImageRecord {
            filename,
            format: cell_text(row.get(1)),
            width: cell_number(row.get(2)),
            height: cell_number(row.get(3)),
            subject: cell_text(row.get(4)),
            audience: cell_text(row.get(5)),
            status: DescriptionStatus::infer(&description),
            description,
            generated_at: cell_text(row.get(7)),
        });
    }

    Ok(records)
}

fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        Some(Data::String(s)) => s.clone(),
        Some(Data::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn cell_number(cell: Option<&Data>) -> u32 {
    match cell {
        Some(Data::Float(f)) if *f >= 0.0 => *f as u32,
        Some(Data::Int(i)) if *i >= 0 => *i as u32,
        Some(Data::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
