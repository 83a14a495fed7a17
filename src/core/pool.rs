use log::{debug, warn};
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::core::cache::ContentIndex;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::{DownloadTask, Fetcher, TaskContext, TaskOptions};

/// 固定并发数的任务执行池
///
/// 提交通过有界队列完成。调度器每取出一个任务先获取一个许可，
/// 任务结束时许可随之释放。必须在 actix 系统内创建。
pub struct WorkerPool {
    sender: Option<mpsc::Sender<Arc<DownloadTask>>>,
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn start(
        size: usize,
        queue_capacity: usize,
        index: Arc<ContentIndex>,
        fetcher: Rc<dyn Fetcher>,
        options: TaskOptions,
    ) -> Self {
        let size = size.max(1);
        let (sender, mut receiver) = mpsc::channel::<Arc<DownloadTask>>(queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(size));
        let permits = semaphore.clone();
        let options = Rc::new(options);

        actix::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let index = index.clone();
                let fetcher = fetcher.clone();
                let options = options.clone();
                actix::spawn(async move {
                    let ctx = TaskContext {
                        index: &index,
                        fetcher: fetcher.as_ref(),
                        options: &options,
                    };
                    task.start(&ctx).await;
                    drop(permit);
                });
            }
            debug!("工作池队列已关闭");
        });

        debug!("工作池已启动: {} 个工作槽, 队列容量 {}", size, queue_capacity.max(1));
        Self {
            sender: Some(sender),
            semaphore,
            size,
        }
    }

    /// 把任务放入队列，不等待执行
    pub fn submit(&self, task: Arc<DownloadTask>) -> DownloadResult<()> {
        let sender = self.sender.as_ref().ok_or(DownloadError::PoolClosed)?;
        sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(task) => {
                warn!("任务队列已满, 拒绝任务 {}", task.id());
                DownloadError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => DownloadError::PoolClosed,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 正在运行的任务数
    pub fn busy(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    /// 关闭队列，已接受的任务仍会执行
    pub fn close(&mut self) {
        if self.sender.take().is_some() {
            debug!("工作池已关闭, 不再接受新任务");
        }
    }
}
