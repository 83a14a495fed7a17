use actix::prelude::*;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::core::cache::index::IndexedUrl;
use crate::core::cache::ContentIndex;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::pool::WorkerPool;
use crate::core::registry::TaskRegistry;
use crate::core::task::{AwcFetcher, DownloadRecord, DownloadTask, Fetcher, TaskStatus};
use crate::utils::validator::{parse_source_url, sanitize_filename};

/// ================== 返回结构体 ==================

/// 取出的缓存文件
#[derive(Debug)]
pub struct FetchedFile {
    pub file: tokio::fs::File,
    pub path: PathBuf,
    /// 已清理过的文件名
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOutcome {
    pub removed: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveByUrlOutcome {
    pub removed: usize,
    pub deleted: bool,
}

/// 管理器统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub finished: usize,
    pub errored: usize,
    /// 已知大小的任务的总字节数
    pub total_bytes: u64,
    pub received_bytes: u64,
    pub cached_urls: usize,
    pub cached_files: usize,
    pub workers: usize,
}

/// ================== 消息 ==================

/// 创建下载任务（不会启动）
pub struct CreateTask {
    pub url: String,
    pub force_refresh: bool,
}
impl Message for CreateTask { type Result = Result<Uuid, DownloadError>; }
impl Handler<CreateTask> for DownloadManagerActor {
    type Result = Result<Uuid, DownloadError>;
    fn handle(&mut self, msg: CreateTask, _ctx: &mut Self::Context) -> Self::Result {
        let url = parse_source_url(&msg.url)?;
        let id = self.registry.create(url.clone(), msg.force_refresh);
        info!("创建任务 {}: {} (强制刷新: {})", id, url, msg.force_refresh);
        Ok(id)
    }
}

/// 提交任务到工作池，每个任务只能提交一次
pub struct SubmitTask { pub task_id: Uuid }
impl Message for SubmitTask { type Result = Result<(), DownloadError>; }
impl Handler<SubmitTask> for DownloadManagerActor {
    type Result = Result<(), DownloadError>;
    fn handle(&mut self, msg: SubmitTask, ctx: &mut Self::Context) -> Self::Result {
        let task = self
            .registry
            .get(&msg.task_id)
            .ok_or(DownloadError::NotFound(msg.task_id))?;
        if task.is_submitted() || task.status() != TaskStatus::Queued {
            return Err(DownloadError::Rejected(msg.task_id));
        }
        if self.pool.is_none() {
            return Err(DownloadError::PoolClosed);
        }
        self.enqueue(task.clone(), ctx)?;
        task.mark_submitted();
        Ok(())
    }
}

/// 查询指定任务状态，不存在时返回 `None`
pub struct QueryTaskStatusById { pub task_id: Uuid }
impl Message for QueryTaskStatusById { type Result = Option<DownloadRecord>; }
impl Handler<QueryTaskStatusById> for DownloadManagerActor {
    type Result = Option<DownloadRecord>;
    fn handle(&mut self, msg: QueryTaskStatusById, _ctx: &mut Self::Context) -> Self::Result {
        self.registry.get(&msg.task_id).map(|task| task.snapshot())
    }
}

/// 查询某个 URL 的全部任务，按创建顺序
pub struct QueryTasksByUrl { pub url: String }
impl Message for QueryTasksByUrl { type Result = Result<Vec<DownloadRecord>, DownloadError>; }
impl Handler<QueryTasksByUrl> for DownloadManagerActor {
    type Result = Result<Vec<DownloadRecord>, DownloadError>;
    fn handle(&mut self, msg: QueryTasksByUrl, _ctx: &mut Self::Context) -> Self::Result {
        let url = parse_source_url(&msg.url)?;
        Ok(self
            .registry
            .find_by_url(&url)
            .iter()
            .map(|task| task.snapshot())
            .collect())
    }
}

/// 打开已完成任务的缓存文件，`filename` 覆盖记录中的文件名
pub struct FetchFile {
    pub task_id: Uuid,
    pub filename: Option<String>,
}
impl Message for FetchFile { type Result = Result<FetchedFile, DownloadError>; }
impl Handler<FetchFile> for DownloadManagerActor {
    type Result = ResponseFuture<Result<FetchedFile, DownloadError>>;
    fn handle(&mut self, msg: FetchFile, _ctx: &mut Self::Context) -> Self::Result {
        let task_id = msg.task_id;
        let task = match self.registry.get(&task_id) {
            Some(task) => task,
            None => return Box::pin(async move { Err(DownloadError::NotFound(task_id)) }),
        };
        let record = task.snapshot();
        let path = match task.file() {
            Some(path) if record.is_done() && record.status == TaskStatus::Finished => path,
            _ => return Box::pin(async move { Err(DownloadError::NotReady(task_id)) }),
        };
        let filename = export_name(&record, msg.filename);
        Box::pin(open_fetched(path, filename))
    }
}

/// 打开某个 URL 任一已完成任务的缓存文件，`filename` 覆盖记录中的文件名
pub struct FetchFileByUrl {
    pub url: String,
    pub filename: Option<String>,
}
impl Message for FetchFileByUrl { type Result = Result<FetchedFile, DownloadError>; }
impl Handler<FetchFileByUrl> for DownloadManagerActor {
    type Result = ResponseFuture<Result<FetchedFile, DownloadError>>;
    fn handle(&mut self, msg: FetchFileByUrl, _ctx: &mut Self::Context) -> Self::Result {
        let url = match parse_source_url(&msg.url) {
            Ok(url) => url,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let finished = self
            .registry
            .find_by_url(&url)
            .into_iter()
            .find_map(|task| task.file().map(|path| (task.snapshot(), path)));
        match finished {
            Some((record, path)) => {
                let filename = export_name(&record, msg.filename);
                Box::pin(open_fetched(path, filename))
            }
            None => Box::pin(async move { Err(DownloadError::UrlNotReady(url.to_string())) }),
        }
    }
}

/// 导出文件名：优先使用非空的覆盖值，否则取记录中的文件名
fn export_name(record: &DownloadRecord, filename: Option<String>) -> String {
    match filename.as_deref() {
        Some(name) if !name.trim().is_empty() => sanitize_filename(name),
        _ => sanitize_filename(record.resolve_filename()),
    }
}

async fn open_fetched(path: PathBuf, filename: String) -> Result<FetchedFile, DownloadError> {
    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();
    Ok(FetchedFile { file, path, filename, size })
}

/// 移除指定任务，运行中的任务不会被移除
pub struct RemoveTaskById {
    pub task_id: Uuid,
    pub delete_file: bool,
}
impl Message for RemoveTaskById { type Result = RemoveOutcome; }
impl Handler<RemoveTaskById> for DownloadManagerActor {
    type Result = ResponseFuture<RemoveOutcome>;
    fn handle(&mut self, msg: RemoveTaskById, _ctx: &mut Self::Context) -> Self::Result {
        let refused = RemoveOutcome { removed: false, deleted: false };
        let task = match self.registry.get(&msg.task_id) {
            Some(task) => task,
            None => return Box::pin(async move { refused }),
        };
        if task.status().is_locked() {
            debug!("任务 {} 正在运行, 拒绝移除", msg.task_id);
            return Box::pin(async move { refused });
        }
        task.cancel();

        let file = if msg.delete_file { task.file() } else { None };
        let removed = self.registry.remove(&msg.task_id);
        let index = self.index.clone();
        let task_id = msg.task_id;
        Box::pin(async move {
            let deleted = match file {
                Some(file) => index.remove_file(task.url(), &file).await,
                None => false,
            };
            info!("移除任务 {} (删除文件: {})", task_id, deleted);
            RemoveOutcome { removed, deleted }
        })
    }
}

/// 移除某个 URL 的全部非运行中任务；`delete_file` 时即使没有任务也会删除索引中的文件
pub struct RemoveTasksByUrl {
    pub url: String,
    pub delete_file: bool,
}
impl Message for RemoveTasksByUrl { type Result = Result<RemoveByUrlOutcome, DownloadError>; }
impl Handler<RemoveTasksByUrl> for DownloadManagerActor {
    type Result = ResponseFuture<Result<RemoveByUrlOutcome, DownloadError>>;
    fn handle(&mut self, msg: RemoveTasksByUrl, _ctx: &mut Self::Context) -> Self::Result {
        let url = match parse_source_url(&msg.url) {
            Ok(url) => url,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let mut removed = 0;
        let mut files = Vec::new();

        for task in self.registry.find_by_url(&url) {
            if task.status().is_locked() {
                continue;
            }
            task.cancel();
            if let Some(file) = task.file() {
                files.push(file);
            }
            if self.registry.remove(&task.id()) {
                removed += 1;
            }
        }

        if msg.delete_file {
            if let Some(hash) = self.index.hash_for(&url) {
                let file = self
                    .index
                    .file_for_hash(&hash)
                    .unwrap_or_else(|| self.index.layout().file_for_hash(&hash));
                files.push(file);
            }
            files.sort();
            files.dedup();
        }

        let index = self.index.clone();
        let delete_file = msg.delete_file;
        Box::pin(async move {
            let mut deleted = false;
            if delete_file {
                if files.is_empty() {
                    index.forget(&url).await;
                }
                for file in &files {
                    deleted |= index.remove_file(&url, file).await;
                }
            }
            info!("按URL移除 {}: {} 个任务 (删除文件: {})", url, removed, deleted);
            Ok(RemoveByUrlOutcome { removed, deleted })
        })
    }
}

/// 等待任务结束并返回最终快照
pub struct AwaitTask { pub task_id: Uuid }
impl Message for AwaitTask { type Result = Result<DownloadRecord, DownloadError>; }
impl Handler<AwaitTask> for DownloadManagerActor {
    type Result = ResponseFuture<Result<DownloadRecord, DownloadError>>;
    fn handle(&mut self, msg: AwaitTask, _ctx: &mut Self::Context) -> Self::Result {
        let task_id = msg.task_id;
        match self.registry.get(&task_id) {
            Some(task) => Box::pin(async move {
                task.wait_done().await;
                Ok(task.snapshot())
            }),
            None => Box::pin(async move { Err(DownloadError::NotFound(task_id)) }),
        }
    }
}

/// 取消指定任务，返回是否发出了取消
pub struct CancelTaskById { pub task_id: Uuid }
impl Message for CancelTaskById { type Result = Result<bool, DownloadError>; }
impl Handler<CancelTaskById> for DownloadManagerActor {
    type Result = Result<bool, DownloadError>;
    fn handle(&mut self, msg: CancelTaskById, _ctx: &mut Self::Context) -> Self::Result {
        let task = self
            .registry
            .get(&msg.task_id)
            .ok_or(DownloadError::NotFound(msg.task_id))?;
        Ok(task.cancel())
    }
}

/// 查询所有任务
pub struct ListTasks;
impl Message for ListTasks { type Result = Vec<DownloadRecord>; }
impl Handler<ListTasks> for DownloadManagerActor {
    type Result = MessageResult<ListTasks>;
    fn handle(&mut self, _msg: ListTasks, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.registry.iter().map(|task| task.snapshot()).collect())
    }
}

/// 列出缓存索引
pub struct ListCacheEntries;
impl Message for ListCacheEntries { type Result = Vec<IndexedUrl>; }
impl Handler<ListCacheEntries> for DownloadManagerActor {
    type Result = MessageResult<ListCacheEntries>;
    fn handle(&mut self, _msg: ListCacheEntries, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.index.entries())
    }
}

/// 获取统计信息
pub struct GetStats;
impl Message for GetStats { type Result = ManagerStats; }
impl Handler<GetStats> for DownloadManagerActor {
    type Result = MessageResult<GetStats>;
    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        let mut stats = ManagerStats {
            total: self.registry.len(),
            cached_urls: self.index.len(),
            cached_files: self.index.file_count(),
            workers: self.pool.as_ref().map(|p| p.size()).unwrap_or(0),
            ..Default::default()
        };
        for task in self.registry.iter() {
            match task.status() {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Checking | TaskStatus::Downloading => stats.running += 1,
                TaskStatus::Finished => stats.finished += 1,
                TaskStatus::Errored | TaskStatus::Unknown => stats.errored += 1,
            }
            if task.total_bytes() > 0 {
                stats.total_bytes += task.total_bytes() as u64;
            }
            if task.received_bytes() > 0 {
                stats.received_bytes += task.received_bytes() as u64;
            }
        }
        MessageResult(stats)
    }
}

/// 关闭：停止接受任务，取消未结束的任务，写回索引并停止 actor
pub struct Shutdown;
impl Message for Shutdown { type Result = Result<(), DownloadError>; }
impl Handler<Shutdown> for DownloadManagerActor {
    type Result = ResponseFuture<Result<(), DownloadError>>;
    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        if let Some(mut pool) = self.pool.take() {
            pool.close();
        }
        let mut cancelled = 0;
        for task in self.registry.iter() {
            if task.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!("关闭时取消了 {} 个未完成的任务", cancelled);
        }
        ctx.stop();
        let index = self.index.clone();
        Box::pin(async move { index.persist().await })
    }
}

/// 全局任务管理器 Actor
pub struct DownloadManagerActor {
    config: Config,
    index: Arc<ContentIndex>,
    registry: TaskRegistry,
    fetcher: Rc<dyn Fetcher>,
    pool: Option<WorkerPool>,
    /// 每个 URL 当前正在执行的任务
    in_flight: HashMap<Url, Arc<DownloadTask>>,
}

impl Actor for DownloadManagerActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        let pool = WorkerPool::start(
            self.config.effective_worker_count(),
            self.config.queue_capacity,
            self.index.clone(),
            self.fetcher.clone(),
            self.config.task_options(),
        );
        info!("下载管理器已启动: {} 个工作槽", pool.size());
        self.pool = Some(pool);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let index = self.index.clone();
        actix::spawn(async move {
            index.persist_logged().await;
            info!("下载管理器已停止, 索引已写回");
        });
    }
}

impl DownloadManagerActor {
    // 创建一个新的任务管理器
    pub fn new(config: Config) -> DownloadResult<Self> {
        let fetcher = Rc::new(AwcFetcher::new(&config));
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: Config, fetcher: Rc<dyn Fetcher>) -> DownloadResult<Self> {
        config.validate()?;
        let index = ContentIndex::open(
            config.layout(),
            config.verify_cache_on_load,
            config.clean_temp_on_startup,
        )?;
        info!(
            "缓存索引已加载: {} 个URL, {} 个文件 ({})",
            index.len(),
            index.file_count(),
            index.layout().root().display()
        );
        Ok(Self {
            config,
            index: Arc::new(index),
            registry: TaskRegistry::new(),
            fetcher,
            pool: None,
            in_flight: HashMap::new(),
        })
    }

    /// 同一 URL 已有未结束的任务时，非强制任务等它结束后再入队，届时缓存检查会直接命中
    fn enqueue(&mut self, task: Arc<DownloadTask>, ctx: &mut Context<Self>) -> DownloadResult<()> {
        if self.config.coalesce_in_flight && !task.force_refresh() {
            let leader = self
                .in_flight
                .get(task.url())
                .filter(|leader| leader.id() != task.id() && !leader.status().is_done())
                .cloned();
            if let Some(leader) = leader {
                debug!("任务 {} 等待同一URL的任务 {} 完成", task.id(), leader.id());
                let follower = task;
                ctx.spawn(
                    async move {
                        leader.wait_done().await;
                    }
                    .into_actor(self)
                    .map(move |_, act, ctx| {
                        if let Err(e) = act.enqueue(follower.clone(), ctx) {
                            warn!("任务 {} 入队失败: {}", follower.id(), e);
                            follower.cancel();
                        }
                    }),
                );
                return Ok(());
            }
        }
        self.dispatch(task, ctx)
    }

    fn dispatch(&mut self, task: Arc<DownloadTask>, ctx: &mut Context<Self>) -> DownloadResult<()> {
        let pool = self.pool.as_ref().ok_or(DownloadError::PoolClosed)?;
        pool.submit(task.clone())?;

        if self.config.coalesce_in_flight {
            let url = task.url().clone();
            let id = task.id();
            self.in_flight.insert(url.clone(), task.clone());
            ctx.spawn(
                async move {
                    task.wait_done().await;
                }
                .into_actor(self)
                .map(move |_, act, _ctx| {
                    if act.in_flight.get(&url).map(|t| t.id()) == Some(id) {
                        act.in_flight.remove(&url);
                    }
                }),
            );
        }
        Ok(())
    }
}
