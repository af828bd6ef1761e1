use std::path::Path;

use tracing::debug;
use url::Url;

use super::errors::ParseError;

/// 每行一个 URL，去掉首尾空白，忽略空行
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn load_url_list(path: &Path) -> Result<Vec<String>, ParseError> {
    let text = tokio::fs::read_to_string(path).await?;
    let urls = parse_url_list(&text);
    debug!("从 {:?} 读取到 {} 个 URL", path, urls.len());
    if urls.is_empty() {
        return Err(ParseError::EmptyList);
    }
    Ok(urls)
}

/// 取 URL 路径的最后一段作为文件名；路径为空时退回整个 URL
pub fn filename_from_url(raw: &str) -> String {
    let basename = match Url::parse(raw) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| segment.to_string())
            })
            .unwrap_or_default(),
        Err(_) => raw
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string(),
    };

    if basename.is_empty() {
        sanitize_filename(raw)
    } else {
        sanitize_filename(&basename)
    }
}

// 文件名中不允许出现路径分隔符等字符
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

// 解析选择范围字符串，返回从 1 开始的行号
// 例如: "1-3,5,7-9" => [1,2,3,5,7,8,9]
pub fn parse_selection(range_str: &str) -> Result<Vec<usize>, ParseError> {
    let mut rows = Vec::new();

    for part in range_str.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.contains('-') {
            let range: Vec<&str> = part.split('-').map(str::trim).collect();
            if range.len() != 2 {
                return Err(ParseError::ParseError(format!("无效的范围格式: {}", part)));
            }

            let start: usize = range[0].parse()?;
            let end: usize = range[1].parse()?;

            if start == 0 || start > end {
                return Err(ParseError::ParseError(format!("无效的范围: {}", part)));
            }

            rows.extend(start..=end);
        } else {
            let row: usize = part.parse()?;
            if row == 0 {
                return Err(ParseError::ParseError("行号从 1 开始".to_string()));
            }
            rows.push(row);
        }
    }

    rows.sort_unstable();
    rows.dedup();

    if rows.is_empty() {
        return Err(ParseError::ParseError("没有选中任何行".to_string()));
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        let text = "https://a.example/1.zip\n\n   \n  https://b.example/2.zip  \r\n";
        assert_eq!(
            parse_url_list(text),
            vec!["https://a.example/1.zip", "https://b.example/2.zip"]
        );
    }

    #[test]
    fn filename_is_last_path_segment() {
        assert_eq!(
            filename_from_url("https://example.com/pub/debian-12.iso?mirror=1"),
            "debian-12.iso"
        );
        assert_eq!(
            filename_from_url("https://example.com/files/my%20report.pdf"),
            "my report.pdf"
        );
    }

    #[test]
    fn url_without_basename_falls_back_to_whole_url() {
        assert_eq!(
            filename_from_url("https://example.com/"),
            "https___example.com_"
        );
    }

    #[test]
    fn selection_ranges_expand() {
        assert_eq!(parse_selection("1-3,5,7-9").unwrap(), vec![1, 2, 3, 5, 7, 8, 9]);
        assert_eq!(parse_selection("4, 2,2").unwrap(), vec![2, 4]);
    }

    #[test]
    fn invalid_selection_is_rejected() {
        assert!(parse_selection("3-1").is_err());
        assert!(parse_selection("0").is_err());
        assert!(parse_selection("a-b").is_err());
        assert!(parse_selection(",").is_err());
    }

    #[tokio::test]
    async fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        tokio::fs::write(&path, "\n\n").await.unwrap();
        assert!(matches!(load_url_list(&path).await, Err(ParseError::EmptyList)));
    }
}
