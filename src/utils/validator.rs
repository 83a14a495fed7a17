use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::core::error::DownloadError;

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[\\/:"*?<>|]+"#).expect("文件名正则无效"))
}

/// 解析下载地址，只接受带主机名的 http/https URL
pub fn parse_source_url(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw.trim()).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(DownloadError::InvalidUrl(format!("{}: 缺少主机名", raw))),
        other => Err(DownloadError::InvalidUrl(format!("{}: 不支持的协议 {}", raw, other))),
    }
}

pub fn is_valid_url(url: &str) -> bool {
    parse_source_url(url).is_ok()
}

/// 把文件系统不允许的字符替换为 `_`
pub fn sanitize_filename(name: &str) -> String {
    unsafe_filename_chars().replace_all(name, "_").into_owned()
}

pub fn validate_output_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        anyhow::bail!("输出路径不能为空");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://example.com/a.bin?x=1"));
        assert!(!is_valid_url("invalid-url"));
        assert!(!is_valid_url("ftp://example.com/file"));
        assert!(!is_valid_url("file:///etc/passwd"));
    }

    #[test]
    fn test_parse_source_url_errors() {
        let err = parse_source_url("ftp://example.com").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert!(err.is_fatal());
        assert_eq!(
            parse_source_url("  https://example.com/a  ").unwrap().as_str(),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a:b*c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_filename("dir/..\\file"), "dir_.._file");
        assert_eq!(sanitize_filename("<<weird>>|name"), "_weird_name");
        assert_eq!(sanitize_filename("normal-name.zip"), "normal-name.zip");
    }

    #[test]
    fn test_output_path_validation() {
        assert!(validate_output_path("./").is_ok());
        assert!(validate_output_path("./nonexistent").is_ok());
        assert!(validate_output_path("  ").is_err());
    }
}
