use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::core::error::DownloadError;
use crate::utils::validator::sanitize_filename;

/// 默认缓冲区大小
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// 缓冲区管理器
pub struct BufferManager {
    buffer: Vec<u8>,
    buffer_size: usize,
    current_pos: usize,
    file_handle: File,
    total_written: u64,
    flush_count: u64,
}

impl BufferManager {
    /// 创建（或截断）目标文件
    pub async fn create(file_path: &Path, buffer_size: usize) -> Result<Self, DownloadError> {
        let buffer_size = buffer_size.max(1);
        let file_handle = File::create(file_path).await?;

        Ok(Self {
            buffer: vec![0; buffer_size],
            buffer_size,
            current_pos: 0,
            file_handle,
            total_written: 0,
            flush_count: 0,
        })
    }

    /// 向缓冲区写入数据
    pub async fn write(&mut self, data: &[u8]) -> Result<(), DownloadError> {
        let mut bytes_written = 0;
        while bytes_written < data.len() {
            let space_left = self.buffer_size - self.current_pos;
            let to_copy = std::cmp::min(space_left, data.len() - bytes_written);

            if to_copy > 0 {
                self.buffer[self.current_pos..self.current_pos + to_copy]
                    .copy_from_slice(&data[bytes_written..bytes_written + to_copy]);
                self.current_pos += to_copy;
                bytes_written += to_copy;
            }

            if self.current_pos == self.buffer_size {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// 将缓冲区内容刷入文件
    pub async fn flush(&mut self) -> Result<(), DownloadError> {
        if self.current_pos > 0 {
            self.file_handle
                .write_all(&self.buffer[..self.current_pos])
                .await?;
            self.total_written += self.current_pos as u64;
            self.current_pos = 0;
            self.flush_count += 1;
        }
        Ok(())
    }

    /// 刷入剩余数据并同步到磁盘，返回总写入字节数
    pub async fn finish(mut self) -> Result<u64, DownloadError> {
        self.flush().await?;
        self.file_handle.flush().await?;
        self.file_handle.sync_all().await?;
        Ok(self.total_written)
    }

    /// 获取刷新次数
    pub fn get_flush_count(&self) -> u64 {
        self.flush_count
    }
}

/// 取 URL 路径最后一个 `/` 之后的部分作为文件名，为空时返回 `None`
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    if segment.is_empty() {
        return None;
    }
    let name = sanitize_filename(segment);
    if name.trim().is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_manager_flushes_on_full_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.part");
        let data: Vec<u8> = (0..100u8).collect();

        let written = tokio_test::block_on(async {
            let mut manager = BufferManager::create(&path, 32).await.unwrap();
            manager.write(&data[..50]).await.unwrap();
            assert_eq!(manager.get_flush_count(), 1);
            manager.write(&data[50..]).await.unwrap();
            assert_eq!(manager.get_flush_count(), 3);
            manager.finish().await.unwrap()
        });

        assert_eq!(written, 100);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_buffer_manager_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.part");
        std::fs::write(&path, vec![7u8; 500]).unwrap();

        tokio_test::block_on(async {
            let mut manager = BufferManager::create(&path, DEFAULT_BUFFER_SIZE).await.unwrap();
            manager.write(b"short").await.unwrap();
            assert_eq!(manager.get_flush_count(), 0);
            manager.finish().await.unwrap();
        });

        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }

    #[test]
    fn test_filename_from_url() {
        let name = |s: &str| filename_from_url(&Url::parse(s).unwrap());
        assert_eq!(name("http://example.com/dir/file.zip").as_deref(), Some("file.zip"));
        assert_eq!(name("http://example.com/dir/file.zip?x=1").as_deref(), Some("file.zip"));
        assert_eq!(name("http://example.com/dir/"), None);
        assert_eq!(name("http://h/dir/"), None);
        assert_eq!(name("http://example.com/a%3Ab.txt").as_deref(), Some("a%3Ab.txt"));
        assert_eq!(name("http://example.com/"), None);
        assert_eq!(name("http://example.com"), None);
    }
}
