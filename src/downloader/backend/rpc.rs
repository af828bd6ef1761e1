use serde::Deserialize;
use serde_json::{Value, json};

use super::{PollOutcome, percent_of};

/// tellStatus 需要的字段
pub const STATUS_KEYS: [&str; 5] = [
    "status",
    "completedLength",
    "totalLength",
    "downloadSpeed",
    "errorMessage",
];

/// aria2 JSON-RPC 调用结果
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply<T> {
    Ok(T),
    /// aria2 返回了 error 对象
    Rejected { code: i64, message: String },
    /// 响应无法解析或缺少字段
    Malformed(String),
    /// 连接失败、超时或非 200 响应
    TransportError(String),
}

impl<T> RpcReply<T> {
    pub fn and_then<U>(self, f: impl FnOnce(T) -> RpcReply<U>) -> RpcReply<U> {
        match self {
            RpcReply::Ok(value) => f(value),
            RpcReply::Rejected { code, message } => RpcReply::Rejected { code, message },
            RpcReply::Malformed(msg) => RpcReply::Malformed(msg),
            RpcReply::TransportError(msg) => RpcReply::TransportError(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

pub fn build_request(method: &str, params: Vec<Value>, secret: Option<&str>) -> Value {
    let mut params = params;
    if let Some(secret) = secret {
        params.insert(0, Value::String(format!("token:{}", secret)));
    }
    json!({
        "jsonrpc": "2.0",
        "id": uuid::Uuid::new_v4().to_string(),
        "method": method,
        "params": params,
    })
}

/// 解析响应包体，只关心 result / error 字段
pub fn decode_envelope(body: &str) -> RpcReply<Value> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => return RpcReply::Malformed(format!("响应不是合法的 JSON-RPC: {}", e)),
    };

    if let Some(error) = envelope.error {
        return RpcReply::Rejected {
            code: error.code,
            message: error.message,
        };
    }

    match envelope.result {
        Some(Value::Null) | None => RpcReply::Malformed("响应缺少 result 字段".to_string()),
        Some(result) => RpcReply::Ok(result),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aria2State {
    Active,
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    status: Aria2State,
    completed_length: String,
    total_length: String,
    download_speed: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aria2Status {
    pub state: Aria2State,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub rate: u64,
    pub error_message: Option<String>,
}

pub fn parse_status(result: Value) -> RpcReply<Aria2Status> {
    let raw: RawStatus = match serde_json::from_value(result) {
        Ok(raw) => raw,
        Err(e) => return RpcReply::Malformed(format!("tellStatus 结构匹配失败: {}", e)),
    };

    let parse = |field: &str, value: &str| {
        value
            .parse::<u64>()
            .map_err(|_| format!("字段 {} 不是数字: {:?}", field, value))
    };

    let parsed = parse("completedLength", &raw.completed_length).and_then(|done| {
        let total = parse("totalLength", &raw.total_length)?;
        let rate = parse("downloadSpeed", &raw.download_speed)?;
        Ok((done, total, rate))
    });

    match parsed {
        Ok((bytes_done, bytes_total, rate)) => RpcReply::Ok(Aria2Status {
            state: raw.status,
            bytes_done,
            bytes_total,
            rate,
            error_message: raw.error_message.filter(|msg| !msg.is_empty()),
        }),
        Err(msg) => RpcReply::Malformed(msg),
    }
}

impl Aria2Status {
    pub fn to_outcome(&self) -> PollOutcome {
        match self.state {
            Aria2State::Complete => PollOutcome::Completed,
            Aria2State::Error => PollOutcome::Failed(
                self.error_message
                    .clone()
                    .unwrap_or_else(|| "aria2 报告下载失败".to_string()),
            ),
            Aria2State::Removed => PollOutcome::Failed("任务已被 aria2 移除".to_string()),
            Aria2State::Active | Aria2State::Waiting | Aria2State::Paused => {
                let total = (self.bytes_total > 0).then_some(self.bytes_total);
                PollOutcome::Progress {
                    percent: percent_of(self.bytes_done, total),
                    bytes_done: self.bytes_done,
                    bytes_total: total,
                    rate: Some(self.rate),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_prepended_as_token() {
        let req = build_request("aria2.tellStatus", vec![json!("abc")], Some("s3cr3t"));
        assert_eq!(req["method"], "aria2.tellStatus");
        assert_eq!(req["params"][0], "token:s3cr3t");
        assert_eq!(req["params"][1], "abc");
        assert_eq!(req["jsonrpc"], "2.0");
    }

    #[test]
    fn envelope_error_is_rejected() {
        let reply = decode_envelope(r#"{"id":"q","jsonrpc":"2.0","error":{"code":1,"message":"GID not found"}}"#);
        assert_eq!(
            reply,
            RpcReply::Rejected {
                code: 1,
                message: "GID not found".to_string()
            }
        );
    }

    #[test]
    fn envelope_without_result_is_malformed() {
        assert!(matches!(decode_envelope("{}"), RpcReply::Malformed(_)));
        assert!(matches!(decode_envelope("<html>"), RpcReply::Malformed(_)));
    }

    #[test]
    fn active_status_maps_to_progress() {
        let reply = parse_status(json!({
            "status": "active",
            "completedLength": "512",
            "totalLength": "2048",
            "downloadSpeed": "1024"
        }));
        let RpcReply::Ok(status) = reply else {
            panic!("expected a parsed status");
        };
        assert_eq!(
            status.to_outcome(),
            PollOutcome::Progress {
                percent: 25,
                bytes_done: 512,
                bytes_total: Some(2048),
                rate: Some(1024),
            }
        );
    }

    #[test]
    fn error_status_carries_message() {
        let RpcReply::Ok(status) = parse_status(json!({
            "status": "error",
            "completedLength": "0",
            "totalLength": "0",
            "downloadSpeed": "0",
            "errorMessage": "404 Not Found"
        })) else {
            panic!("expected a parsed status");
        };
        assert_eq!(status.to_outcome(), PollOutcome::Failed("404 Not Found".into()));
    }

    #[test]
    fn non_numeric_lengths_are_malformed() {
        let reply = parse_status(json!({
            "status": "active",
            "completedLength": "lots",
            "totalLength": "2048",
            "downloadSpeed": "0"
        }));
        assert!(matches!(reply, RpcReply::Malformed(_)));
    }

    #[test]
    fn unknown_state_is_malformed() {
        let reply = parse_status(json!({
            "status": "exploded",
            "completedLength": "0",
            "totalLength": "0",
            "downloadSpeed": "0"
        }));
        assert!(matches!(reply, RpcReply::Malformed(_)));
    }
}
