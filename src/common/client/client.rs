use std::time::Duration;

use reqwest::{
    Client, ClientBuilder, Response, StatusCode,
    header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

// 所有 HTTP 访问共用的客户端，超时由调用方决定
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub inner: Client,
}

impl HttpClient {
    // 整个请求（含读取响应体）有总超时，用于探测、解析和 RPC
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let inner = ClientBuilder::new()
            .timeout(timeout)
            .default_headers(Self::get_default_headers())
            .build()?;
        Ok(Self { inner })
    }

    // 流式下载只限制连接和单次读取的时间，不限制总时长
    pub fn for_streaming(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let inner = ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .default_headers(Self::get_default_headers())
            .build()?;
        Ok(Self { inner })
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("batchdl/", env!("CARGO_PKG_VERSION"))),
        );
        headers
    }

    pub async fn get_raw_response(&self, url: &str) -> Result<Response, reqwest::Error> {
        self.inner.get(url).send().await
    }

    /// 只读取文本响应的前 max_bytes 字节
    ///
    /// 非 200 或非文本的响应不读取响应体，返回 None。
    pub async fn get_text_prefix(
        &self,
        url: &str,
        max_bytes: usize,
    ) -> Result<Option<String>, reqwest::Error> {
        let resp = self.get_raw_response(url).await?;
        let status = resp.status();
        debug!("GET {} -> {}", url, status);
        if status != StatusCode::OK || !is_text_content(resp.headers()) {
            return Ok(None);
        }

        let mut body = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let room = max_bytes - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= max_bytes {
                break;
            }
        }
        Ok(Some(String::from_utf8_lossy(&body).into_owned()))
    }

    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Response, reqwest::Error> {
        self.inner.post(url).json(body).send().await
    }

    // HEAD 请求获取文件大小，只认 200 且带 Content-Length 的响应
    pub async fn head_content_length(&self, url: &str) -> Option<u64> {
        let resp = match self.inner.head(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("HEAD 请求失败: {}, {}", url, e);
                return None;
            }
        };

        if resp.status() != StatusCode::OK {
            debug!("HEAD {} -> {}", url, resp.status());
            return None;
        }

        content_length_header(resp.headers())
    }
}

pub fn content_length_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|ct_len| ct_len.to_str().ok())
        .and_then(|ct_len| ct_len.parse().ok())
}

// 没有 Content-Type 时按文本处理
fn is_text_content(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|ct| ct.to_str().ok()) else {
        return true;
    };
    let mime = content_type.to_ascii_lowercase();
    mime.starts_with("text/")
        || mime.contains("html")
        || mime.contains("xml")
        || mime.contains("javascript")
}
