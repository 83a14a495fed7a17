//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `state`: 任务状态 `TaskStatus` 与状态单元 `StatusCell`
//! - `record`: 任务快照 `DownloadRecord`
//! - `download`: 任务本体 `DownloadTask` 与实际的下载逻辑
//! - `fetcher`: 字节获取能力 `Fetcher` 及其 HTTP 实现
//! - `util`: 工具类，如 `BufferManager`

pub mod state;
pub mod record;
pub mod download;
pub mod fetcher;
pub mod util;

// 导出核心组件，方便外部使用
pub use download::{DownloadTask, TaskContext, TaskOptions};
pub use fetcher::{AwcFetcher, FetchResponse, Fetcher};
pub use record::{DownloadRecord, DEFAULT_FILENAME};
pub use state::{StatusCell, TaskStatus};
pub use self::util::BufferManager;
