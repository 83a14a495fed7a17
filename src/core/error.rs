use thiserror::Error;
use std::io;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("下载失败: {0}")]
    FetchFailure(String),

    #[error("服务器错误: HTTP {0}")]
    ServerError(u16),

    #[error("文件大小不匹配: 预期 {expected} 字节, 实际 {actual} 字节")]
    SizeMismatch {
        expected: u64,
        actual: u64,
    },

    #[error("缓存文件放置失败: {0}")]
    PlacementFailure(String),

    #[error("索引文件损坏: {file} 第 {line} 行: {reason}")]
    IndexCorruption {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("IO错误: {0}")]
    IoError(#[from] io::Error),

    #[error("任务ID不存在: {0}")]
    NotFound(Uuid),

    #[error("任务尚未完成: {0}")]
    NotReady(Uuid),

    #[error("URL 没有已完成的任务: {0}")]
    UrlNotReady(String),

    #[error("任务已提交、正在运行或已结束: {0}")]
    Rejected(Uuid),

    #[error("下载超时")]
    Timeout,

    #[error("下载被取消")]
    Cancelled,

    #[error("任务队列已满")]
    QueueFull,

    #[error("工作池已关闭")]
    PoolClosed,

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// 调用方无法通过重新提交解决的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::InvalidUrl(_) |
            DownloadError::InvalidConfig(_) |
            DownloadError::PoolClosed
        )
    }
}

impl From<String> for DownloadError {
    fn from(error: String) -> Self {
        DownloadError::Unknown(error)
    }
}

impl From<&str> for DownloadError {
    fn from(error: &str) -> Self {
        DownloadError::Unknown(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_fatal() {
        let invalid_url = DownloadError::InvalidUrl("invalid://url".to_string());
        assert!(invalid_url.is_fatal());

        assert!(DownloadError::PoolClosed.is_fatal());
        assert!(!DownloadError::QueueFull.is_fatal());
        assert!(!DownloadError::NotFound(Uuid::new_v4()).is_fatal());
        assert!(!DownloadError::FetchFailure("reset".to_string()).is_fatal());
    }

    #[test]
    fn test_error_conversion() {
        let error_str = "测试错误";
        let error: DownloadError = error_str.into();
        assert!(matches!(error, DownloadError::Unknown(_)));

        let error_string = "测试错误".to_string();
        let error: DownloadError = error_string.into();
        assert!(matches!(error, DownloadError::Unknown(_)));

        let io = io::Error::new(io::ErrorKind::NotFound, "gone");
        let error: DownloadError = io.into();
        assert!(matches!(error, DownloadError::IoError(_)));
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
