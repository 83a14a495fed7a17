//! cachedown: 内容寻址的下载缓存
//!
//! 每个 URL 下载后按内容的 SHA-256 存放在 `Downloads/` 下，
//! URL 到哈希、URL 到文件名的映射写在数据目录的两个索引文件中，
//! 重启后可以直接复用。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;
