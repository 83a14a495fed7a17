use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::cache::CacheLayout;
use crate::core::error::DownloadError;
use crate::core::task::TaskOptions;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 缓存数据目录，索引文件与 Downloads 目录都在这里
    pub data_dir: String,
    /// 同时运行的下载任务数，0 表示按 CPU 核数
    pub worker_count: usize,
    /// 等待执行的任务队列容量
    pub queue_capacity: usize,
    /// 单次下载的超时时间（秒），0 表示不限制
    pub fetch_timeout: u64,
    /// 建立连接的超时时间（秒）
    pub connect_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 写入缓冲区大小（字节）
    pub buffer_size: usize,
    /// 同一 URL 的并发请求是否合并为一次下载
    pub coalesce_in_flight: bool,
    /// 启动时是否校验缓存文件内容与文件名一致
    pub verify_cache_on_load: bool,
    /// 启动时是否清理上次残留的临时文件
    pub clean_temp_on_startup: bool,
    /// 日志级别: error / warn / info / debug / trace
    pub log_level: String,
    /// 日志文件路径，为空时只输出到终端
    pub log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./cachedown".to_string(),
            worker_count: 0,
            queue_capacity: 256,
            fetch_timeout: 0,
            connect_timeout: 30,
            user_agent: concat!("cachedown/", env!("CARGO_PKG_VERSION")).to_string(),
            buffer_size: crate::core::task::util::DEFAULT_BUFFER_SIZE,
            coalesce_in_flight: true,
            verify_cache_on_load: true,
            clean_temp_on_startup: true,
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl Config {
    /// 加载配置文件，文件不存在或格式错误时写入带教程的默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    Config::save_with_tutorial(&config, path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            Config::save_with_tutorial(&config, path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tutorial_content = Config::generate_tutorial_content();
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Unknown(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", tutorial_content, config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    /// 生成配置文件教程内容（静态方法）
    fn generate_tutorial_content() -> String {
        r#"# cachedown 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件，用于配置 cachedown 下载缓存的行为。
# 你可以根据需要修改文件末尾的设置，然后保存文件。
#
# 配置文件位置：
# - Windows: %APPDATA%/cachedown/cachedown.conf
# - macOS: ~/Library/Application Support/cachedown/cachedown.conf
# - Linux: ~/.config/cachedown/cachedown.conf
#
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   cachedown https://example.com/file.zip                  # 下载并缓存
#   cachedown -o ./out https://example.com/file.zip         # 下载后导出到 ./out
#   cachedown --force https://example.com/file.zip          # 忽略缓存重新下载
#   cachedown --remove --delete https://example.com/file.zip  # 从缓存中移除并删除文件
#   cachedown --list                                         # 列出缓存索引
#
# ==================== 配置项说明 ====================
#
# data_dir             缓存数据目录。目录结构：
#                        url_hashes.txt      URL -> 内容哈希
#                        url_filenames.txt   URL -> 文件名
#                        Downloads/<哈希>    缓存文件
# worker_count         同时运行的下载任务数，0 表示按 CPU 核数
# queue_capacity       等待执行的任务队列容量，队列满时新任务会被拒绝
# fetch_timeout        单次下载的超时时间（秒），0 表示不限制
# connect_timeout      建立连接的超时时间（秒）
# user_agent           请求使用的 User-Agent
# buffer_size          写入缓冲区大小（字节），建议 4096-65536
# coalesce_in_flight   同一 URL 正在下载时，新的请求等待其完成后直接使用缓存
# verify_cache_on_load 启动时重新计算缓存文件哈希，内容不符的文件不会被使用（默认开启）
#                      关闭后启动更快，但被改动过的文件也会被当作缓存
# clean_temp_on_startup 启动时删除上次残留的 temp_*.part 文件
# log_level            日志级别: error / warn / info / debug / trace
#                      环境变量 RUST_LOG 优先
# log_file             日志文件路径，为空时只输出到终端
#
# ==================== 故障排除 ====================
#
# 问题：同一个文件被下载了两次
# 解决：确认 coalesce_in_flight = true，并且没有使用 --force
#
# 问题：大文件下载总是失败
# 解决：增大 fetch_timeout，或设为 0 不限制
#
# 问题：缓存文件被手动修改过
# 解决：保持 verify_cache_on_load = true，内容不符的文件会在下次下载时被替换
"#
        .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        // 验证数据目录
        if self.data_dir.trim().is_empty() {
            return Err(DownloadError::InvalidConfig("数据目录不能为空".to_string()));
        }

        // 验证队列容量
        if self.queue_capacity == 0 {
            return Err(DownloadError::InvalidConfig("队列容量必须大于0".to_string()));
        }

        // 验证连接超时
        if self.connect_timeout == 0 {
            return Err(DownloadError::InvalidConfig("连接超时时间必须大于0".to_string()));
        }

        // 验证缓冲区大小
        if self.buffer_size == 0 {
            return Err(DownloadError::InvalidConfig("缓冲区大小必须大于0".to_string()));
        }

        if self.user_agent.trim().is_empty() {
            return Err(DownloadError::InvalidConfig("User-Agent 不能为空".to_string()));
        }

        if crate::utils::logger::parse_level(&self.log_level).is_none() {
            return Err(DownloadError::InvalidConfig(format!(
                "未知的日志级别: {}",
                self.log_level
            )));
        }

        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        // 命令行参数覆盖配置文件
        if let Some(data_dir) = &args.data_dir {
            self.data_dir = data_dir.clone();
        }

        if let Some(workers) = args.workers {
            self.worker_count = workers;
        }

        if let Some(timeout) = args.timeout {
            self.fetch_timeout = timeout;
        }

        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn layout(&self) -> CacheLayout {
        CacheLayout::new(&self.data_dir)
    }

    /// 实际使用的工作槽数量
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn fetch_timeout_duration(&self) -> Option<Duration> {
        if self.fetch_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.fetch_timeout))
        }
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }

    pub fn task_options(&self) -> TaskOptions {
        TaskOptions {
            buffer_size: self.buffer_size,
            fetch_timeout: self.fetch_timeout_duration(),
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 数据目录: {}\n\
            - 工作槽数: {}\n\
            - 队列容量: {}\n\
            - 下载超时: {}\n\
            - 连接超时: {} 秒\n\
            - 缓冲区: {} 字节\n\
            - 合并并发请求: {}\n\
            - 启动校验缓存: {}",
            self.data_dir,
            self.effective_worker_count(),
            self.queue_capacity,
            if self.fetch_timeout == 0 { "不限制".to_string() } else { format!("{} 秒", self.fetch_timeout) },
            self.connect_timeout,
            self.buffer_size,
            if self.coalesce_in_flight { "启用" } else { "禁用" },
            if self.verify_cache_on_load { "启用" } else { "禁用" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.data_dir, "./cachedown");
        assert_eq!(config.worker_count, 0);
        assert_eq!(config.buffer_size, 8192);
        assert!(config.coalesce_in_flight);
        assert!(config.clean_temp_on_startup);
        assert!(config.verify_cache_on_load);
        assert!(config.fetch_timeout_duration().is_none());
        assert!(config.effective_worker_count() >= 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(DownloadError::InvalidConfig(_))));

        config = Config::default();
        config.data_dir = " ".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cachedown.conf");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.worker_count = 3;
        config.fetch_timeout = 15;
        config.save_with_tutorial(path).expect("保存带教程的配置失败");
        let loaded = Config::load(path).expect("加载配置失败");

        assert_eq!(loaded.worker_count, 3);
        assert_eq!(loaded.fetch_timeout_duration(), Some(Duration::from_secs(15)));
        assert_eq!(loaded.data_dir, config.data_dir);
    }

    #[test]
    fn test_config_save_with_tutorial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cachedown.conf");
        let path = path.to_str().unwrap();
        Config::default().save_with_tutorial(path).expect("保存带教程的配置失败");
        let content = fs::read_to_string(path).expect("读取配置文件失败");
        assert!(content.contains("cachedown 配置文件"));
        assert!(content.contains("使用示例"));
        assert!(content.contains("故障排除"));
        assert!(content.contains("coalesce_in_flight = true"));
    }

    #[test]
    fn test_config_missing_or_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.conf");
        let config = Config::load(missing.to_str().unwrap()).unwrap();
        assert_eq!(config.queue_capacity, 256);
        assert!(missing.exists());

        let broken = dir.path().join("broken.conf");
        fs::write(&broken, "worker_count = \"many\"").unwrap();
        let config = Config::load(broken.to_str().unwrap()).unwrap();
        assert_eq!(config.worker_count, 0);

        let partial = dir.path().join("partial.conf");
        fs::write(&partial, "worker_count = 5\n").unwrap();
        let config = Config::load(partial.to_str().unwrap()).unwrap();
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.connect_timeout, 30);
    }

    #[test]
    fn test_task_options() {
        let mut config = Config::default();
        config.buffer_size = 1024;
        config.fetch_timeout = 2;
        let options = config.task_options();
        assert_eq!(options.buffer_size, 1024);
        assert_eq!(options.fetch_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_config_summary() {
        let summary = Config::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("数据目录"));
        assert!(summary.contains("不限制"));
    }
}
