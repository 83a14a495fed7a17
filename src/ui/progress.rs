use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::task::{DownloadRecord, TaskStatus};

const BAR_TEMPLATE: &str = "{prefix:24!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";

// 结构体：ProgressManager
// 每个任务一条进度条
pub struct ProgressManager {
    multi: MultiProgress,
    bars: HashMap<Uuid, ProgressBar>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// 不输出任何内容，用于 JSON 模式
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        ProgressManager {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
        }
    }

    // 添加进度条，长度在知道总大小后再设置
    pub fn add_task(&mut self, id: Uuid, label: &str) {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(style);
        pb.set_prefix(label.to_string());
        pb.set_message(status_text(TaskStatus::Queued));
        self.bars.insert(id, pb);
    }

    // 方法：按任务快照更新进度
    pub fn update(&self, record: &DownloadRecord) {
        let Some(pb) = self.bars.get(&record.id) else {
            return;
        };
        if pb.is_finished() {
            return;
        }
        if record.total_bytes > 0 {
            pb.set_length(record.total_bytes as u64);
        }
        if record.received_bytes >= 0 {
            pb.set_position(record.received_bytes as u64);
        }

        match record.status {
            TaskStatus::Downloading => {
                let text = match record.progress_percentage() {
                    Some(p) => format!("{:.0}%", p),
                    None => status_text(record.status),
                };
                pb.set_message(text);
            }
            status if status.is_done() => pb.finish_with_message(status_text(status)),
            status => pb.set_message(status_text(status)),
        }
    }

    /// 结束所有还在显示的进度条
    pub fn finish(&self) {
        for pb in self.bars.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    #[cfg(test)]
    fn bar(&self, id: &Uuid) -> Option<&ProgressBar> {
        self.bars.get(id)
    }
}

fn status_text(status: TaskStatus) -> String {
    match status {
        TaskStatus::Queued => "排队中",
        TaskStatus::Checking => "检查缓存",
        TaskStatus::Downloading => "下载中",
        TaskStatus::Finished => "完成",
        TaskStatus::Errored => "失败",
        TaskStatus::Unknown => "未知",
    }
    .to_string()
}
