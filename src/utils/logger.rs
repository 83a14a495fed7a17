use chrono::Local; // 用于获取本地时间
use env_logger::{Builder, Target};
use log::LevelFilter; // 用于设置日志级别
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::core::error::DownloadError;

/// 日志文件最大大小，超过后在启动时轮转
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// 解析日志级别名称
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    level.trim().parse().ok()
}

/// 检查并执行日志轮转：文件超过 `max_size` 时重命名为 `<file>.backup`
pub fn rotate_if_needed(path: &Path, max_size: u64) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if size <= max_size {
        return Ok(false);
    }

    let mut backup = path.as_os_str().to_owned();
    backup.push(".backup");
    if Path::new(&backup).exists() {
        fs::remove_file(&backup)?;
    }
    fs::rename(path, &backup)?;
    Ok(true)
}

/// 以追加模式打开日志文件
pub fn open_log_file(path: &Path, max_size: u64) -> io::Result<File> {
    // 确保日志目录存在
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    rotate_if_needed(path, max_size)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// 初始化全局日志，格式为 `YYYY-MM-DD HH:MM:SS [LEVEL] - message`。
/// `RUST_LOG` 环境变量优先于配置中的级别。
pub fn init_logger(level: &str, log_file: Option<&Path>) -> Result<(), DownloadError> {
    let mut builder = Builder::new();
    builder.filter_level(parse_level(level).unwrap_or(LevelFilter::Info));
    builder.parse_default_env();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = open_log_file(path, DEFAULT_MAX_LOG_SIZE)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .map_err(|e| DownloadError::Unknown(format!("日志初始化失败: {}", e)))
}
