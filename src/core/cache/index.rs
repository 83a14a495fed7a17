use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use url::Url;

use super::{hash_file_blocking, is_hash_name, properties, CacheLayout};
use crate::core::error::{DownloadError, DownloadResult};

const INDEX_HEADER: &str = "Changed at";

/// 缓存命中的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: String,
    pub file: PathBuf,
    pub filename: Option<String>,
    pub size: u64,
}

/// 索引中的一条 URL 记录，用于列出缓存内容
#[derive(Debug, Clone, Serialize)]
pub struct IndexedUrl {
    pub url: Url,
    pub hash: String,
    pub filename: Option<String>,
}

#[derive(Debug, Default)]
struct IndexMaps {
    url_hashes: HashMap<Url, String>,
    url_filenames: HashMap<Url, String>,
    hash_files: HashMap<String, PathBuf>,
}

/// URL -> 哈希 -> 文件 的持久化索引
///
/// 启动时加载一次，之后增量维护。每次修改都由调用方（或者 `lookup`/`forget`/`remove_file`
/// 自身）写回磁盘，写盘过程由 `persist_lock` 串行化，并在 tokio 的阻塞线程池中执行。
/// 只有 `hash_files` 中登记过的文件才会被当作缓存命中。
#[derive(Debug)]
pub struct ContentIndex {
    layout: CacheLayout,
    verify_on_scan: bool,
    maps: RwLock<IndexMaps>,
    persist_lock: Mutex<()>,
}

impl ContentIndex {
    /// 创建目录、清理残留的临时文件并加载索引
    pub fn open(layout: CacheLayout, verify_on_scan: bool, clean_temp: bool) -> DownloadResult<Self> {
        layout.ensure_dirs()?;
        let index = Self {
            layout,
            verify_on_scan,
            maps: RwLock::new(IndexMaps::default()),
            persist_lock: Mutex::new(()),
        };
        if clean_temp {
            let removed = index.clean_temp_files()?;
            if removed > 0 {
                info!("已清理 {} 个残留的临时文件", removed);
            }
        }
        index.reload()?;
        Ok(index)
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMaps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMaps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_hash_for(&self, url: &Url) -> bool {
        self.read().url_hashes.contains_key(url)
    }

    pub fn hash_for(&self, url: &Url) -> Option<String> {
        self.read().url_hashes.get(url).cloned()
    }

    pub fn set_hash_for(&self, url: Url, hash: String) {
        self.write().url_hashes.insert(url, hash);
    }

    pub fn remove_hash_for(&self, url: &Url) -> Option<String> {
        self.write().url_hashes.remove(url)
    }

    pub fn filename_for(&self, url: &Url) -> Option<String> {
        self.read().url_filenames.get(url).cloned()
    }

    pub fn set_filename_for(&self, url: Url, filename: String) {
        self.write().url_filenames.insert(url, filename);
    }

    pub fn remove_filename_for(&self, url: &Url) -> Option<String> {
        self.write().url_filenames.remove(url)
    }

    pub fn file_for_hash(&self, hash: &str) -> Option<PathBuf> {
        self.read().hash_files.get(hash).cloned()
    }

    pub fn set_file_for_hash(&self, hash: String, file: PathBuf) {
        self.write().hash_files.insert(hash, file);
    }

    pub fn remove_file_for_hash(&self, hash: &str) -> Option<PathBuf> {
        self.write().hash_files.remove(hash)
    }

    /// URL 尚未登记时写入哈希和文件名，已登记则保持不变（先写入者生效）
    pub fn register_if_absent(&self, url: &Url, hash: &str, filename: Option<&str>) -> bool {
        let mut maps = self.write();
        if maps.url_hashes.contains_key(url) {
            return false;
        }
        maps.url_hashes.insert(url.clone(), hash.to_string());
        match filename {
            Some(name) => {
                maps.url_filenames.insert(url.clone(), name.to_string());
            }
            None => {
                maps.url_filenames.remove(url);
            }
        }
        true
    }

    /// 缓存检查：URL 有哈希且 `hash_files` 中登记的文件存在时命中。
    /// 文件丢失或未登记时清除该 URL 的两项映射并写盘。
    pub async fn lookup(&self, url: &Url) -> Option<CacheEntry> {
        let (hash, filename, known_file) = {
            let maps = self.read();
            let hash = maps.url_hashes.get(url)?.clone();
            let known_file = maps.hash_files.get(&hash).cloned();
            (hash, maps.url_filenames.get(url).cloned(), known_file)
        };

        if let Some(file) = known_file {
            match tokio::fs::metadata(&file).await {
                Ok(meta) if meta.is_file() => {
                    return Some(CacheEntry {
                        hash,
                        file,
                        filename,
                        size: meta.len(),
                    });
                }
                _ => warn!("缓存文件已丢失, 清除索引: {} -> {}", url, file.display()),
            }
        } else {
            warn!("哈希没有对应的缓存文件, 清除索引: {} -> {}", url, hash);
        }

        let purged = {
            let mut maps = self.write();
            maps.hash_files.remove(&hash);
            if maps.url_hashes.get(url) == Some(&hash) {
                maps.url_hashes.remove(url);
                maps.url_filenames.remove(url);
                true
            } else {
                false
            }
        };
        if purged {
            self.persist_logged().await;
        }
        None
    }

    /// 清除 URL 的哈希与文件名映射并写盘
    pub async fn forget(&self, url: &Url) -> bool {
        let removed = {
            let mut maps = self.write();
            let hash = maps.url_hashes.remove(url).is_some();
            let name = maps.url_filenames.remove(url).is_some();
            hash || name
        };
        if removed {
            debug!("已清除索引: {}", url);
            self.persist_logged().await;
        }
        removed
    }

    /// 清除 URL 映射以及文件对应的哈希记录，删除文件并写盘。
    /// 返回文件是否存在并被删除。
    pub async fn remove_file(&self, url: &Url, file: &Path) -> bool {
        {
            let mut maps = self.write();
            maps.url_hashes.remove(url);
            maps.url_filenames.remove(url);
            if let Some(hash) = file.file_name().and_then(|n| n.to_str()) {
                if maps.hash_files.get(hash).map(|p| p.as_path()) == Some(file) {
                    maps.hash_files.remove(hash);
                }
            }
        }

        let deleted = match tokio::fs::remove_file(file).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("无法删除缓存文件 {}: {}", file.display(), e);
                false
            }
        };
        self.persist_logged().await;
        info!("已移除 {} ({}, 删除: {})", url, file.display(), deleted);
        deleted
    }

    /// 重新读取两个索引文件并扫描下载目录，完成后整体替换内存中的映射
    pub fn reload(&self) -> DownloadResult<()> {
        let url_hashes = self.load_url_map(&self.layout.url_hashes_file())?;
        let url_filenames = self.load_url_map(&self.layout.url_filenames_file())?;
        let hash_files = self.scan_downloads()?;

        debug!(
            "索引已加载: {} 个URL哈希, {} 个文件名, {} 个缓存文件",
            url_hashes.len(),
            url_filenames.len(),
            hash_files.len()
        );

        *self.write() = IndexMaps {
            url_hashes,
            url_filenames,
            hash_files,
        };
        Ok(())
    }

    fn load_url_map(&self, path: &Path) -> DownloadResult<HashMap<Url, String>> {
        let mut map = HashMap::new();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(map),
            Err(e) => return Err(e.into()),
        };
        let content = String::from_utf8_lossy(&bytes);
        let source = path.display().to_string();

        for (line, entry) in properties::parse(&source, &content) {
            let (key, value) = match entry {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("跳过索引行: {}", e);
                    continue;
                }
            };
            match Url::parse(&key) {
                Ok(url) => {
                    map.insert(url, value);
                }
                Err(e) => {
                    let err = DownloadError::IndexCorruption {
                        file: source.clone(),
                        line,
                        reason: format!("无法解析URL {}: {}", key, e),
                    };
                    warn!("跳过索引行: {}", err);
                }
            }
        }
        Ok(map)
    }

    fn scan_downloads(&self) -> DownloadResult<HashMap<String, PathBuf>> {
        let mut files = HashMap::new();
        for entry in fs::read_dir(self.layout.downloads_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if CacheLayout::is_temp_file_name(&name) {
                continue;
            }
            if !is_hash_name(&name) {
                debug!("忽略非缓存文件: {}", name);
                continue;
            }
            let path = entry.path();
            if self.verify_on_scan {
                match hash_file_blocking(&path) {
                    Ok(actual) if actual == name => {}
                    Ok(actual) => {
                        warn!("缓存文件内容与名称不符, 已忽略: {} (实际 {})", name, actual);
                        continue;
                    }
                    Err(e) => {
                        warn!("无法校验缓存文件 {}: {}", name, e);
                        continue;
                    }
                }
            }
            files.insert(name, path);
        }
        Ok(files)
    }

    /// 删除下载目录中的临时文件，返回删除的数量
    pub fn clean_temp_files(&self) -> DownloadResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.layout.downloads_dir())? {
            let entry = entry?;
            let is_temp = entry
                .file_name()
                .to_str()
                .map(CacheLayout::is_temp_file_name)
                .unwrap_or(false);
            if !is_temp {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("无法删除临时文件 {}: {}", entry.path().display(), e),
            }
        }
        Ok(removed)
    }

    /// 将两个 URL 映射写回磁盘，空映射会删除对应文件
    pub async fn persist(&self) -> DownloadResult<()> {
        let _guard = self.persist_lock.lock().await;
        let (hashes, filenames) = {
            let maps = self.read();
            let hashes: Vec<(String, String)> = maps
                .url_hashes
                .iter()
                .map(|(url, hash)| (url.to_string(), hash.clone()))
                .collect();
            let filenames: Vec<(String, String)> = maps
                .url_filenames
                .iter()
                .map(|(url, name)| (url.to_string(), name.clone()))
                .collect();
            (hashes, filenames)
        };

        let hashes_file = self.layout.url_hashes_file();
        let filenames_file = self.layout.url_filenames_file();
        tokio::task::spawn_blocking(move || {
            write_map(&hashes_file, hashes)?;
            write_map(&filenames_file, filenames)
        })
        .await
        .map_err(|e| DownloadError::Unknown(format!("索引写入任务异常: {}", e)))?
    }

    /// 写盘失败只记录日志，内存中的索引仍然有效，下次修改或关闭时会再次写盘
    pub async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!("索引写入失败: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.read().url_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().url_hashes.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.read().hash_files.len()
    }

    /// 按 URL 排序的全部索引记录
    pub fn entries(&self) -> Vec<IndexedUrl> {
        let maps = self.read();
        let mut entries: Vec<IndexedUrl> = maps
            .url_hashes
            .iter()
            .map(|(url, hash)| IndexedUrl {
                url: url.clone(),
                hash: hash.clone(),
                filename: maps.url_filenames.get(url).cloned(),
            })
            .collect();
        entries.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
        entries
    }
}

fn write_map(path: &Path, entries: Vec<(String, String)>) -> DownloadResult<()> {
    if entries.is_empty() {
        return match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
    }

    let content = properties::render(entries, INDEX_HEADER);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DownloadError::InvalidConfig(format!("无效的索引路径: {}", path.display())))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name));
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
