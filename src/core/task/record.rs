use chrono::{DateTime, Local};
use serde::{Serialize, Deserialize};
use std::hash::{Hash, Hasher};
use url::Url;
use uuid::Uuid;

use super::state::TaskStatus;

/// 文件名缺失时的占位名称
pub const DEFAULT_FILENAME: &str = "unknown";

/// 下载任务的记录快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: Uuid,
    pub url: Url,
    pub filename: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub done: bool,
    pub content_hash: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    pub total_bytes: i64,
    pub received_bytes: i64,
}

impl DownloadRecord {
    pub fn new(id: Uuid, url: Url) -> Self {
        Self {
            id,
            url,
            filename: None,
            status: TaskStatus::Queued,
            done: false,
            content_hash: None,
            started_at: None,
            finished_at: None,
            total_bytes: -1,
            received_bytes: -1,
        }
    }

    pub fn resolve_filename(&self) -> &str {
        match self.filename.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => DEFAULT_FILENAME,
        }
    }

    /// `UNKNOWN` 虽然属于结束状态，但不算真正完成
    pub fn is_done(&self) -> bool {
        self.status.is_done() && self.status != TaskStatus::Unknown
    }

    /// 下载进度百分比，总大小未知时返回 `None`
    pub fn progress_percentage(&self) -> Option<f32> {
        if self.total_bytes <= 0 || self.received_bytes < 0 {
            return None;
        }
        Some((self.received_bytes as f32 / self.total_bytes as f32) * 100.0)
    }
}

impl PartialEq for DownloadRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DownloadRecord {}

impl Hash for DownloadRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
