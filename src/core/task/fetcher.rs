use async_trait::async_trait;
use awc::http::header;
use awc::{Client, Connector};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::config::Config;
use crate::core::error::DownloadError;

/// 响应体字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>>>>;

/// 一次请求的响应
pub struct FetchResponse {
    /// 服务器声明的长度，未声明时为 `None`
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// 原始字节获取能力
///
/// awc 客户端不是 `Send` 的，所以实现只需在 actix arbiter 上运行。
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch(&self, url: &url::Url) -> Result<FetchResponse, DownloadError>;
}

/// 基于 awc 的 HTTP 实现
pub struct AwcFetcher {
    client: Client,
}

impl AwcFetcher {
    pub fn new(config: &Config) -> Self {
        // 整体超时由任务自己控制，客户端只限制建立连接的时间
        let connector = Connector::new().timeout(config.connect_timeout_duration());
        let client = Client::builder()
            .connector(connector)
            .disable_timeout()
            .add_default_header((header::USER_AGENT, config.user_agent.clone()))
            .finish();
        Self { client }
    }
}

#[async_trait(?Send)]
impl Fetcher for AwcFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<FetchResponse, DownloadError> {
        let response = self
            .client
            .get(url.as_str())
            .insert_header((header::ACCEPT_ENCODING, "identity"))
            .no_decompress()
            .send()
            .await
            .map_err(|e| DownloadError::FetchFailure(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(DownloadError::ServerError(response.status().as_u16()));
        }

        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let body = response.map(|chunk| {
            chunk.map_err(|e| DownloadError::FetchFailure(format!("网络流错误: {}", e)))
        });

        Ok(FetchResponse {
            content_length,
            body: Box::pin(body),
        })
    }
}
