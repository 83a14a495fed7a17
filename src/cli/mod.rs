//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析和验证
//! - 配置文件路径管理
//! - URL 列表处理（命令行参数和文件）
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 下载并缓存：`cachedown <url>`
//! - 批量下载：`cachedown -f urls.txt`
//! - 导出文件：`cachedown -o ./out <url>`
//! - 强制刷新：`cachedown --force <url>`
//! - 移除缓存：`cachedown --remove --delete <url>`
//! - 列出缓存：`cachedown --list`
//! - 编辑配置：`cachedown -e`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/cachedown/cachedown.conf`
//! - macOS: `~/Library/Application Support/cachedown/cachedown.conf`
//! - Linux: `~/.config/cachedown/cachedown.conf`

use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::DownloadError;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/cachedown/cachedown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/cachedown/cachedown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/cachedown/cachedown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// cachedown 命令行参数
///
/// 示例用法：
///   cachedown https://example.com/file.zip
///   cachedown -o ./out https://example.com/file.zip
///   cachedown --remove --delete https://example.com/file.zip
///   cachedown --list --json
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cachedown",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个用 Rust 编写的内容寻址下载缓存",
    long_about = "按内容的 SHA-256 缓存下载结果，同一个 URL 只下载一次，重启后继续复用。\n\n示例：\n  cachedown https://example.com/file.zip\n  cachedown -o ./out -n data.zip https://example.com/file.zip\n  cachedown --force https://example.com/file.zip\n  cachedown --remove --delete https://example.com/file.zip\n  cachedown --list\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 缓存数据目录
    #[arg(long, short = 'd', help = "缓存数据目录，覆盖配置文件中的设置。")]
    pub data_dir: Option<String>,

    /// 导出目录
    #[arg(long = "out-dir", short = 'o', help = "下载完成后把文件复制到该目录。")]
    pub out_dir: Option<String>,

    /// 导出时使用的文件名
    #[arg(long, short = 'n', help = "导出时使用的文件名，覆盖URL自动推断，仅对单个URL有效。")]
    pub file_name: Option<String>,

    /// 工作槽数量
    #[arg(long, short = 't', help = "同时运行的下载数量，覆盖配置文件中的设置。")]
    pub workers: Option<usize>,

    /// 单个下载的超时
    #[arg(long, help = "单个下载的超时（秒），0 表示不限制。")]
    pub timeout: Option<u64>,

    /// 日志级别
    #[arg(long, help = "日志级别：error、warn、info、debug、trace。")]
    pub log_level: Option<String>,

    /// 忽略缓存重新下载
    #[arg(long, help = "忽略已有缓存，重新下载。")]
    pub force: bool,

    /// 移除URL的任务和缓存映射
    #[arg(long, conflicts_with = "list", help = "移除URL的缓存映射。")]
    pub remove: bool,

    /// 移除时同时删除缓存文件
    #[arg(long, requires = "remove", help = "与 --remove 一起使用，同时删除缓存文件。")]
    pub delete: bool,

    /// 列出缓存中的URL
    #[arg(long, help = "列出缓存中的所有URL并退出。")]
    pub list: bool,

    /// 以 JSON 输出结果
    #[arg(long, help = "以 JSON 格式输出结果。")]
    pub json: bool,
}

impl Args {
    /// 解析命令行参数并加载合并后的配置
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();
        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 加载或创建配置文件，再用命令行参数覆盖
    pub fn load_config(&self) -> Result<Config, DownloadError> {
        let mut config = Config::load(&self.config)
            .map_err(|e| DownloadError::InvalidConfig(format!("无法读取配置文件 {}: {}", self.config, e)))?;

        // 合并命令行参数到配置
        config.merge_from_args(self);
        config.validate()?;
        Ok(config)
    }

    /// 收集命令行和文件中的 URL，列出缓存时允许为空
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            if !Path::new(file_path).exists() {
                return Err(DownloadError::InvalidConfig(format!("URL文件不存在: {}", file_path)));
            }
            let content = fs::read_to_string(file_path)?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        for url in &urls {
            crate::utils::validator::parse_source_url(url)?;
        }

        if urls.is_empty() && !self.list {
            return Err(DownloadError::InvalidUrl(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }

        Ok(urls)
    }
}
