use chrono::{DateTime, Local};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;
use uuid::Uuid;

use super::fetcher::{FetchResponse, Fetcher};
use super::record::DownloadRecord;
use super::state::{StatusCell, TaskStatus};
use super::util::{filename_from_url, BufferManager, DEFAULT_BUFFER_SIZE};
use crate::core::cache::{self, ContentIndex};
use crate::core::error::{DownloadError, DownloadResult};

/// 任务执行参数
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub buffer_size: usize,
    /// 单次下载的最长时间
    pub fetch_timeout: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            fetch_timeout: None,
        }
    }
}

/// 任务运行时依赖的共享资源
pub struct TaskContext<'a> {
    pub index: &'a ContentIndex,
    pub fetcher: &'a dyn Fetcher,
    pub options: &'a TaskOptions,
}

#[derive(Debug, Default)]
struct TaskState {
    filename: Option<String>,
    content_hash: Option<String>,
    file: Option<PathBuf>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
    /// 已进入提交阶段，取消不再生效
    committed: bool,
}

/// 下载成功后放入缓存的结果
struct Placed {
    hash: String,
    file: PathBuf,
    filename: Option<String>,
}

/// 一次把 URL 变成缓存文件的尝试
#[derive(Debug)]
pub struct DownloadTask {
    id: Uuid,
    url: Url,
    force_refresh: bool,
    status: StatusCell,
    state: Mutex<TaskState>,
    total_bytes: AtomicI64,
    received_bytes: AtomicI64,
    is_cancelled: AtomicBool,
    cancel_notify: Notify,
    submitted: AtomicBool,
}

impl DownloadTask {
    pub fn new(url: Url, force_refresh: bool) -> Self {
        Self::with_id(Uuid::new_v4(), url, force_refresh)
    }

    pub fn with_id(id: Uuid, url: Url, force_refresh: bool) -> Self {
        Self {
            id,
            url,
            force_refresh,
            status: StatusCell::new(TaskStatus::Queued),
            state: Mutex::new(TaskState::default()),
            total_bytes: AtomicI64::new(-1),
            received_bytes: AtomicI64::new(-1),
            is_cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            submitted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    pub fn status(&self) -> TaskStatus {
        self.status.get()
    }

    pub fn total_bytes(&self) -> i64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn received_bytes(&self) -> i64 {
        self.received_bytes.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 标记为已提交，每个任务只能提交一次
    pub fn mark_submitted(&self) -> bool {
        !self.submitted.swap(true, Ordering::SeqCst)
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }

    /// 缓存文件路径，仅在任务完成后可用
    pub fn file(&self) -> Option<PathBuf> {
        let state = self.lock_state();
        if self.status.get() == TaskStatus::Finished {
            state.file.clone()
        } else {
            None
        }
    }

    /// 等待任务进入结束状态
    pub async fn wait_done(&self) -> TaskStatus {
        self.status.wait_done().await
    }

    /// 取消任务。排队中的任务直接进入 `ERRORED`，运行中的任务会在下一次等待时停止。
    /// 传输完成后（校验、放置文件或缓存命中时）返回 `false`，任务照常完成。
    pub fn cancel(&self) -> bool {
        if self.status.get().is_done() {
            return false;
        }
        {
            let state = self.lock_state();
            if state.committed {
                return false;
            }
            self.is_cancelled.store(true, Ordering::SeqCst);
        }
        self.cancel_notify.notify_waiters();
        if self.status.try_transition(TaskStatus::Queued, TaskStatus::Errored) {
            self.lock_state().finished_at = Some(Local::now());
            info!("任务 {} 在开始前被取消", self.id);
        }
        true
    }

    /// 进入提交阶段。已被取消时返回 `false`
    fn commit(&self) -> bool {
        let mut state = self.lock_state();
        if self.is_cancelled() {
            return false;
        }
        state.committed = true;
        true
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.cancel_notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// 当前状态的快照
    pub fn snapshot(&self) -> DownloadRecord {
        let state = self.lock_state();
        let status = self.status.get();
        let finished = status == TaskStatus::Finished;
        DownloadRecord {
            id: self.id,
            url: self.url.clone(),
            filename: state.filename.clone(),
            status,
            done: status.is_done(),
            content_hash: if finished { state.content_hash.clone() } else { None },
            started_at: state.started_at,
            finished_at: state.finished_at,
            total_bytes: self.total_bytes(),
            received_bytes: self.received_bytes(),
        }
    }

    /// 执行任务。只有第一次调用会真正运行，之后的调用直接返回 `false`。
    /// 错误不会向外传播，只体现为 `ERRORED` 状态。
    pub async fn start(&self, ctx: &TaskContext<'_>) -> bool {
        if !self.status.try_transition(TaskStatus::Queued, TaskStatus::Checking) {
            debug!("任务 {} 已经开始或已结束, 忽略重复启动", self.id);
            return false;
        }
        self.lock_state().started_at = Some(Local::now());
        info!("开始任务 {}: {}", self.id, self.url);

        if self.is_cancelled() {
            return self.fail(DownloadError::Cancelled);
        }

        if self.force_refresh {
            ctx.index.forget(&self.url).await;
        } else if let Some(entry) = ctx.index.lookup(&self.url).await {
            if !self.commit() {
                return self.fail(DownloadError::Cancelled);
            }
            let size = entry.size as i64;
            self.total_bytes.store(size, Ordering::SeqCst);
            self.received_bytes.store(size, Ordering::SeqCst);
            info!("缓存命中 {}: {}", self.url, entry.hash);
            let filename = entry.filename.or_else(|| filename_from_url(&self.url));
            return self.finish(Placed {
                hash: entry.hash,
                file: entry.file,
                filename,
            });
        }

        if !self.status.try_transition(TaskStatus::Checking, TaskStatus::Downloading) {
            return false;
        }

        let temp = ctx.index.layout().temp_file(self.id);
        match self.download(ctx, &temp).await {
            Ok(placed) => self.finish(placed),
            Err(e) => {
                remove_temp(&temp).await;
                self.fail(e)
            }
        }
    }

    async fn download(&self, ctx: &TaskContext<'_>, temp: &Path) -> DownloadResult<Placed> {
        let transfer = async {
            match ctx.options.fetch_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.transfer(ctx, temp)).await {
                    Ok(result) => result,
                    Err(_) => Err(DownloadError::Timeout),
                },
                None => self.transfer(ctx, temp).await,
            }
        };

        tokio::select! {
            result = transfer => result?,
            _ = self.cancelled() => return Err(DownloadError::Cancelled),
        }
        if !self.commit() {
            return Err(DownloadError::Cancelled);
        }

        let hash = cache::hash_file(temp.to_path_buf()).await?;
        let canonical = ctx.index.layout().file_for_hash(&hash);
        // 索引中没有登记的同名文件内容不可信，直接替换
        let overwrite = self.force_refresh || ctx.index.file_for_hash(&hash).is_none();
        place_file(temp, &canonical, overwrite).await?;
        ctx.index.set_file_for_hash(hash.clone(), canonical.clone());

        let filename = filename_from_url(&self.url);
        if !ctx.index.register_if_absent(&self.url, &hash, filename.as_deref()) {
            warn!(
                "{} 已被其他任务登记, 保留原有映射 (本次哈希 {})",
                self.url, hash
            );
        }
        ctx.index.persist_logged().await;

        Ok(Placed {
            hash,
            file: canonical,
            filename,
        })
    }

    /// 把响应体写入临时文件
    async fn transfer(&self, ctx: &TaskContext<'_>, temp: &Path) -> DownloadResult<()> {
        let FetchResponse {
            content_length,
            mut body,
        } = ctx.fetcher.fetch(&self.url).await?;

        self.total_bytes
            .store(content_length.map(|n| n as i64).unwrap_or(-1), Ordering::SeqCst);
        self.received_bytes.store(0, Ordering::SeqCst);

        let mut writer = BufferManager::create(temp, ctx.options.buffer_size).await?;
        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            writer.write(&chunk).await?;
            received += chunk.len() as u64;
            self.received_bytes.store(received as i64, Ordering::SeqCst);
        }
        let flushes = writer.get_flush_count();
        let written = writer.finish().await?;

        if let Some(expected) = content_length {
            if expected != written {
                return Err(DownloadError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }
        debug!(
            "已接收 {} 字节 (写盘 {} 次): {} -> {}",
            written, flushes, self.url, temp.display()
        );
        Ok(())
    }

    fn finish(&self, placed: Placed) -> bool {
        {
            let mut state = self.lock_state();
            state.file = Some(placed.file);
            state.content_hash = Some(placed.hash);
            state.filename = placed.filename;
            state.finished_at = Some(Local::now());
        }
        let current = self.status.get();
        if self.status.try_transition(current, TaskStatus::Finished) {
            info!("任务完成 {}: {}", self.id, self.url);
            true
        } else {
            false
        }
    }

    fn fail(&self, err: DownloadError) -> bool {
        error!("任务失败 {} ({}): {}", self.id, self.url, err);
        {
            let mut state = self.lock_state();
            state.file = None;
            state.content_hash = None;
            state.filename = None;
            state.finished_at = Some(Local::now());
        }
        let current = self.status.get();
        self.status.try_transition(current, TaskStatus::Errored);
        false
    }
}

/// 把临时文件放到以哈希命名的位置。目标已存在且 `overwrite` 为假时保留原文件，
/// 否则由 rename 直接替换，目标路径始终指向一个完整的文件。
async fn place_file(temp: &Path, canonical: &Path, overwrite: bool) -> DownloadResult<()> {
    let exists = tokio::fs::try_exists(canonical).await.unwrap_or(false);
    if exists && !overwrite {
        info!("文件 {} 已存在, 不覆盖", canonical.display());
        remove_temp(temp).await;
        return Ok(());
    }

    if let Err(e) = tokio::fs::rename(temp, canonical).await {
        debug!("重命名失败 ({}), 改为复制: {}", e, canonical.display());
        tokio::fs::copy(temp, canonical).await.map_err(|e| {
            DownloadError::PlacementFailure(format!(
                "{} -> {}: {}",
                temp.display(),
                canonical.display(),
                e
            ))
        })?;
        remove_temp(temp).await;
    }
    Ok(())
}

async fn remove_temp(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("无法删除临时文件 {}: {}", temp.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{hash_bytes, CacheLayout};
    use crate::core::task::fetcher::testing::ScriptedFetcher;
    use std::rc::Rc;
    use std::sync::Arc;

    const URL: &str = "http://example.com/files/a.bin";

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn open_index(dir: &Path) -> ContentIndex {
        ContentIndex::open(CacheLayout::new(dir), false, true).unwrap()
    }

    fn task(force: bool) -> DownloadTask {
        DownloadTask::new(Url::parse(URL).unwrap(), force)
    }

    fn downloads_count(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("Downloads")).unwrap().count()
    }

    #[actix_rt::test]
    async fn test_download_200_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let data = body(200);
        let fetcher = ScriptedFetcher::new().with_body(URL, data.clone());
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(task.start(&ctx).await);

        let record = task.snapshot();
        let expected = hash_bytes(&data);
        assert_eq!(record.status, TaskStatus::Finished);
        assert!(record.done);
        assert_eq!(record.total_bytes, 200);
        assert_eq!(record.received_bytes, 200);
        assert_eq!(record.content_hash.as_deref(), Some(expected.as_str()));
        assert_eq!(record.filename.as_deref(), Some("a.bin"));
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());

        let file = task.file().unwrap();
        assert_eq!(file, dir.path().join("Downloads").join(&expected));
        assert_eq!(std::fs::read(&file).unwrap(), data);
        assert_eq!(cache::hash_file_blocking(&file).unwrap(), expected);
        assert_eq!(index.hash_for(&Url::parse(URL).unwrap()), Some(expected));
        assert!(!index.layout().temp_file(task.id()).exists());
        assert_eq!(downloads_count(dir.path()), 1);
    }

    #[actix_rt::test]
    async fn test_start_runs_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new().with_body(URL, body(10));
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(task.start(&ctx).await);
        assert!(!task.start(&ctx).await);
        assert_eq!(fetcher.calls(), 1);
    }

    #[actix_rt::test]
    async fn test_cache_hit_skips_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new().with_body(URL, body(300));
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let first = task(false);
        assert!(first.start(&ctx).await);
        let second = task(false);
        assert!(second.start(&ctx).await);

        assert_eq!(fetcher.calls(), 1);
        let (a, b) = (first.snapshot(), second.snapshot());
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(b.received_bytes, 300);
        assert_eq!(b.total_bytes, 300);
        assert_eq!(first.file(), second.file());
    }

    #[actix_rt::test]
    async fn test_force_refresh_always_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new().with_body(URL, body(50));
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        assert!(task(false).start(&ctx).await);
        let forced = task(true);
        assert!(forced.start(&ctx).await);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(forced.snapshot().content_hash, Some(hash_bytes(&body(50))));
        assert_eq!(downloads_count(dir.path()), 1);
    }

    #[actix_rt::test]
    async fn test_forced_download_replaces_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new().with_body(URL, body(50)).varying();
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let first = task(false);
        assert!(first.start(&ctx).await);
        let forced = task(true);
        assert!(forced.start(&ctx).await);

        let new_hash = forced.snapshot().content_hash.unwrap();
        assert_ne!(first.snapshot().content_hash.unwrap(), new_hash);
        assert_eq!(index.hash_for(&Url::parse(URL).unwrap()), Some(new_hash));
    }

    #[actix_rt::test]
    async fn test_not_found_ends_errored() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new();
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(!task.start(&ctx).await);
        let record = task.snapshot();
        assert_eq!(record.status, TaskStatus::Errored);
        assert!(record.content_hash.is_none());
        assert!(record.filename.is_none());
        assert!(task.file().is_none());
        assert!(index.is_empty());
        assert_eq!(downloads_count(dir.path()), 0);
    }

    #[actix_rt::test]
    async fn test_size_mismatch_ends_errored() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new()
            .with_body(URL, body(100))
            .with_declared_length(URL, 150);
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(!task.start(&ctx).await);
        assert_eq!(task.status(), TaskStatus::Errored);
        assert_eq!(task.total_bytes(), 150);
        assert_eq!(task.received_bytes(), 100);
        assert!(index.is_empty());
        assert_eq!(downloads_count(dir.path()), 0);
    }

    #[actix_rt::test]
    async fn test_fetch_timeout_ends_errored() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new()
            .with_body(URL, body(640))
            .with_chunk_delay(Duration::from_millis(50));
        let options = TaskOptions {
            buffer_size: DEFAULT_BUFFER_SIZE,
            fetch_timeout: Some(Duration::from_millis(100)),
        };
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(!task.start(&ctx).await);
        assert_eq!(task.status(), TaskStatus::Errored);
        assert!(!index.layout().temp_file(task.id()).exists());
        assert!(index.is_empty());
    }

    #[actix_rt::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new().with_body(URL, body(10));
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(task.cancel());
        assert_eq!(task.status(), TaskStatus::Errored);
        assert!(!task.start(&ctx).await);
        assert!(!task.cancel());
        assert_eq!(fetcher.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_cancel_during_download() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(open_index(dir.path()));
        let fetcher = Rc::new(
            ScriptedFetcher::new()
                .with_body(URL, body(64 * 40))
                .with_chunk_delay(Duration::from_millis(10)),
        );
        let task = Arc::new(task(false));

        let handle = {
            let (index, fetcher, task) = (index.clone(), fetcher.clone(), task.clone());
            actix_rt::spawn(async move {
                let options = TaskOptions::default();
                let ctx = TaskContext { index: &index, fetcher: fetcher.as_ref(), options: &options };
                task.start(&ctx).await
            })
        };

        while task.status() != TaskStatus::Downloading {
            actix_rt::time::sleep(Duration::from_millis(5)).await;
        }
        actix_rt::time::sleep(Duration::from_millis(30)).await;
        assert!(task.cancel());

        assert!(!handle.await.unwrap());
        assert_eq!(task.status(), TaskStatus::Errored);
        assert!(task.received_bytes() < 64 * 40);
        assert!(!index.layout().temp_file(task.id()).exists());
        assert!(index.is_empty());
    }

    #[actix_rt::test]
    async fn test_stale_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let fetcher = ScriptedFetcher::new().with_body(URL, body(20));
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let first = task(false);
        assert!(first.start(&ctx).await);
        std::fs::remove_file(first.file().unwrap()).unwrap();

        let second = task(false);
        assert!(second.start(&ctx).await);
        assert_eq!(fetcher.calls(), 2);
        assert!(second.file().unwrap().exists());
        assert_eq!(second.snapshot().content_hash, first.snapshot().content_hash);
    }

    #[actix_rt::test]
    async fn test_status_is_monotonic() {
        fn rank(status: TaskStatus) -> u8 {
            match status {
                TaskStatus::Queued => 0,
                TaskStatus::Checking => 1,
                TaskStatus::Downloading => 2,
                _ => 3,
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(open_index(dir.path()));
        let fetcher = Rc::new(
            ScriptedFetcher::new()
                .with_body(URL, body(64 * 10))
                .with_chunk_delay(Duration::from_millis(5)),
        );
        let task = Arc::new(task(false));

        let handle = {
            let (index, fetcher, task) = (index.clone(), fetcher.clone(), task.clone());
            actix_rt::spawn(async move {
                let options = TaskOptions::default();
                let ctx = TaskContext { index: &index, fetcher: fetcher.as_ref(), options: &options };
                task.start(&ctx).await
            })
        };

        let mut seen = vec![task.status()];
        let mut last_received = -1;
        let mut saw_partial = false;
        while !task.status().is_done() {
            let status = task.status();
            assert!(rank(status) >= rank(*seen.last().unwrap()));
            let received = task.received_bytes();
            assert!(received >= last_received);
            if received > 0 && received < task.total_bytes() {
                saw_partial = true;
            }
            last_received = received;
            seen.push(status);
            actix_rt::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(handle.await.unwrap());
        assert!(seen.contains(&TaskStatus::Downloading));
        assert!(saw_partial, "没有观察到传输中的进度");
        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.received_bytes(), 64 * 10);
    }

    #[test]
    fn test_cancel_after_commit_is_refused() {
        let committed = task(false);
        assert!(committed.status.try_transition(TaskStatus::Queued, TaskStatus::Checking));
        assert!(committed.commit());
        assert!(!committed.cancel());
        assert!(!committed.is_cancelled());
        assert_eq!(committed.status(), TaskStatus::Checking);

        let cancelled = task(false);
        assert!(cancelled.cancel());
        assert!(!cancelled.commit());
    }

    #[actix_rt::test]
    async fn test_forced_download_replaces_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        let data = body(80);
        let fetcher = ScriptedFetcher::new().with_body(URL, data.clone());
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let first = task(false);
        assert!(first.start(&ctx).await);
        let file = first.file().unwrap();
        // 人为破坏文件内容，强制刷新后应被完整替换
        std::fs::write(&file, b"corrupted").unwrap();

        let forced = task(true);
        assert!(forced.start(&ctx).await);
        assert_eq!(forced.file().unwrap(), file);
        assert_eq!(std::fs::read(&file).unwrap(), data);
        assert_eq!(downloads_count(dir.path()), 1);
    }

    #[actix_rt::test]
    async fn test_unregistered_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let data = body(40);
        let hash = hash_bytes(&data);
        std::fs::create_dir_all(dir.path().join("Downloads")).unwrap();
        std::fs::write(dir.path().join("Downloads").join(&hash), b"tampered").unwrap();

        let index = ContentIndex::open(CacheLayout::new(dir.path()), true, true).unwrap();
        assert!(index.file_for_hash(&hash).is_none());
        let fetcher = ScriptedFetcher::new().with_body(URL, data.clone());
        let options = TaskOptions::default();
        let ctx = TaskContext { index: &index, fetcher: &fetcher, options: &options };

        let task = task(false);
        assert!(task.start(&ctx).await);
        let file = task.file().unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), data);
        assert_eq!(cache::hash_file_blocking(&file).unwrap(), hash);
    }
}
