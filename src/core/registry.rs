use std::collections::HashMap;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use crate::core::task::DownloadTask;

/// 所有任务的登记表，保留插入顺序
///
/// 由管理器 actor 独占，所有访问都经过 actor 的邮箱串行化。
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<Uuid, Arc<DownloadTask>>,
    order: Vec<Uuid>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个排队中的任务，不会启动
    pub fn create(&mut self, url: Url, force_refresh: bool) -> Uuid {
        let task = Arc::new(DownloadTask::new(url, force_refresh));
        let id = task.id();
        self.tasks.insert(id, task);
        self.order.push(id);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<DownloadTask>> {
        self.tasks.get(id).cloned()
    }

    /// 无条件移除
    pub fn remove(&mut self, id: &Uuid) -> bool {
        if self.tasks.remove(id).is_some() {
            self.order.retain(|other| other != id);
            true
        } else {
            false
        }
    }

    /// 按创建顺序返回该 URL 的全部任务
    pub fn find_by_url(&self, url: &Url) -> Vec<Arc<DownloadTask>> {
        self.iter().filter(|task| task.url() == url).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DownloadTask>> {
        self.order.iter().filter_map(move |id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
