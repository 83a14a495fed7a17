//! Core: 内容索引、下载任务、任务注册表、工作池以及管理器 actor

pub mod actor_manager;
pub mod cache;
pub mod error;
pub mod pool;
pub mod registry;
pub mod task;

// 只导出主流程和其它模块实际用到的类型
pub use actor_manager::{
    AwaitTask, CancelTaskById, CreateTask, DownloadManagerActor, FetchFile, FetchFileByUrl,
    FetchedFile, GetStats, ListCacheEntries, ListTasks, ManagerStats, QueryTaskStatusById,
    QueryTasksByUrl,
    RemoveByUrlOutcome, RemoveOutcome, RemoveTaskById, RemoveTasksByUrl, Shutdown, SubmitTask,
};
pub use cache::{CacheLayout, ContentIndex};
pub use error::{DownloadError, DownloadResult};
pub use task::{DownloadRecord, TaskStatus};
