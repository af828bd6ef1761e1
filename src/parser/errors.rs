use std::num::ParseIntError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("读取 URL 列表失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("文件中没有找到任何 URL")]
    EmptyList,
    #[error("解析错误: {0}")]
    ParseError(String),
}

impl From<ParseIntError> for ParseError {
    fn from(err: ParseIntError) -> Self {
        ParseError::ParseError(err.to_string())
    }
}
