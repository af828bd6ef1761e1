pub struct FormatTool;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

impl FormatTool {
    // 格式化文件大小，例如 1536 => "1.5KB"
    pub fn format_size(size: u64) -> String {
        let mut value = size as f64;
        for unit in UNITS {
            if value < 1024.0 {
                return format!("{:.1}{}", value, unit);
            }
            value /= 1024.0;
        }
        format!("{:.1}PB", value)
    }

    // 格式化下载速度
    pub fn format_speed(speed: u64) -> String {
        format!("{}/s", Self::format_size(speed))
    }

    pub fn format_optional_size(size: Option<u64>) -> String {
        size.map(Self::format_size).unwrap_or_else(|| "—".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(FormatTool::format_size(0), "0.0B");
        assert_eq!(FormatTool::format_size(1023), "1023.0B");
        assert_eq!(FormatTool::format_size(1536), "1.5KB");
        assert_eq!(FormatTool::format_size(5 * 1024 * 1024), "5.0MB");
        assert_eq!(FormatTool::format_size(1024u64.pow(5) * 2), "2.0PB");
    }

    #[test]
    fn speed_and_unknown_size() {
        assert_eq!(FormatTool::format_speed(2048), "2.0KB/s");
        assert_eq!(FormatTool::format_optional_size(None), "—");
    }
}
