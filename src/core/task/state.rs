use serde::{Serialize, Deserialize};
use std::fmt;
use tokio::sync::watch;

/// 下载任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Checking,
    Downloading,
    Finished,
    Errored,
    /// 从未赋值过的状态
    #[default]
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Errored | TaskStatus::Unknown)
    }

    pub fn is_locked(self) -> bool {
        matches!(self, TaskStatus::Checking | TaskStatus::Downloading)
    }

    /// 状态转换表，终态不可离开，也不允许回退
    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Checking) |
            (Queued, Errored) |
            (Checking, Downloading) |
            (Checking, Finished) |
            (Checking, Errored) |
            (Downloading, Finished) |
            (Downloading, Errored)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Checking => "CHECKING",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Errored => "ERRORED",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个任务的状态单元
///
/// 检查与写入在同一把锁内完成，所以 `try_transition` 相当于一次 CAS。
/// 同时它也是任务的完成信号：`wait_done` 会一直等到任务进入结束状态。
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<TaskStatus>,
}

impl StatusCell {
    pub fn new(initial: TaskStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> TaskStatus {
        *self.tx.borrow()
    }

    /// 仅当当前状态等于 `expected` 且转换合法时写入 `next`
    pub fn try_transition(&self, expected: TaskStatus, next: TaskStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == expected && expected.can_transition(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub async fn wait_done(&self) -> TaskStatus {
        let mut rx = self.tx.subscribe();
        let result = rx.wait_for(|status| status.is_done()).await.map(|status| *status);
        result.unwrap_or_else(|_| self.get())
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(TaskStatus::Queued)
    }
}
