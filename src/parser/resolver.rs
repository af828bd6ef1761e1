use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::common::client::client::HttpClient;

/// 跳转只在页面的前 1 MiB 内查找
pub const MAX_PAGE_BYTES: usize = 1024 * 1024;

lazy_static! {
    // 常见的跳转写法，只接受 http(s) 绝对地址
    static ref REDIRECT_PATTERNS: Vec<Regex> = [
        r#"window\.open\(\s*["'](https?://[^"']+)["']"#,
        r#"(?:window\.)?location(?:\.href)?\s*=\s*["'](https?://[^"']+)["']"#,
        r#"location\.replace\(\s*["'](https?://[^"']+)["']"#,
        r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["']\s*\d*\s*;\s*url\s*=\s*(https?://[^"'>\s]+)"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect();
}

/// 在页面内容中查找第一个跳转目标
pub fn find_redirect(body: &str) -> Option<String> {
    REDIRECT_PATTERNS
        .iter()
        .filter_map(|re| re.captures(body))
        .filter_map(|caps| caps.get(1))
        .min_by_key(|m| m.start())
        .map(|m| m.as_str().to_string())
}

/// 尝试从下载页中找出真实的文件地址，任何失败都返回原地址
#[derive(Debug, Clone)]
pub struct LinkResolver {
    client: HttpClient,
}

impl LinkResolver {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn resolve(&self, page_url: &str) -> String {
        let body = match self.client.get_text_prefix(page_url, MAX_PAGE_BYTES).await {
            Ok(Some(body)) => body,
            Ok(None) => return page_url.to_string(),
            Err(e) => {
                debug!("链接解析请求失败，使用原地址: {}, {}", page_url, e);
                return page_url.to_string();
            }
        };

        match find_redirect(&body) {
            Some(target) => {
                debug!("链接解析: {} -> {}", page_url, target);
                target
            }
            None => page_url.to_string(),
        }
    }
}
