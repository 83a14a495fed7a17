//! Cache: 内容寻址缓存的目录布局、哈希计算以及 URL 索引
//!
//! 目录结构（位于 `data_dir` 下）：
//!
//! - `url_hashes.txt`: URL -> 内容哈希
//! - `url_filenames.txt`: URL -> 文件名
//! - `Downloads/<hash>`: 以内容哈希命名的缓存文件
//! - `Downloads/temp_<uuid>.part`: 下载中的临时文件

pub mod index;
pub mod properties;

pub use index::{CacheEntry, ContentIndex};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::core::error::{DownloadError, DownloadResult};

pub const DOWNLOADS_DIR: &str = "Downloads";
pub const URL_HASHES_FILE: &str = "url_hashes.txt";
pub const URL_FILENAMES_FILE: &str = "url_filenames.txt";

const TEMP_FILE_PREFIX: &str = "temp_";
const TEMP_FILE_SUFFIX: &str = ".part";
const HASH_READ_BUFFER: usize = 64 * 1024;

fn temp_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^temp_.+\.part$").expect("临时文件正则无效"))
}

/// 缓存目录布局
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    pub fn url_hashes_file(&self) -> PathBuf {
        self.root.join(URL_HASHES_FILE)
    }

    pub fn url_filenames_file(&self) -> PathBuf {
        self.root.join(URL_FILENAMES_FILE)
    }

    /// 任务私有的临时文件，按任务ID确定
    pub fn temp_file(&self, task_id: Uuid) -> PathBuf {
        self.downloads_dir()
            .join(format!("{}{}{}", TEMP_FILE_PREFIX, task_id, TEMP_FILE_SUFFIX))
    }

    pub fn file_for_hash(&self, hash: &str) -> PathBuf {
        self.downloads_dir().join(hash)
    }

    pub fn is_temp_file_name(name: &str) -> bool {
        temp_file_pattern().is_match(name)
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.downloads_dir())
    }
}

/// SHA-256 摘要的 URL 安全 base64 编码（带填充）
pub fn encode_hash(digest: &[u8]) -> String {
    URL_SAFE.encode(digest)
}

/// 名称是否为合法的内容哈希
pub fn is_hash_name(name: &str) -> bool {
    URL_SAFE
        .decode(name)
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

pub fn hash_bytes(data: &[u8]) -> String {
    encode_hash(&Sha256::digest(data))
}

/// 阻塞地计算文件内容哈希
pub fn hash_file_blocking(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_READ_BUFFER];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(encode_hash(&hasher.finalize()))
}

/// 在阻塞线程池中计算文件哈希
pub async fn hash_file(path: PathBuf) -> DownloadResult<String> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await
        .map_err(|e| DownloadError::PlacementFailure(format!("哈希线程异常: {}", e)))?
        .map_err(|e| DownloadError::PlacementFailure(format!("无法计算哈希 {}: {}", display, e)))
}
