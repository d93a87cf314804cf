//! 回传协议领域模型
//!
//! 纯数据结构与纯解析，不依赖 tokio。一次 TCP 连接承载一问一答：
//!
//! ```text
//! S: 100 Ready (<version>)\n
//! C: Auth-Key: <hex>\n
//!    Host-Alias: <string>\n
//!    Command: <name>\n
//!    Content-Length: <decimal>\n
//!    \n
//!    <body>
//! S: 200 Success\n
//! ```
//!
//! 行一律以 LF（0x0A）结尾，头部为 UTF-8 文本，body 是不透明字节。

use std::collections::HashMap;

use crate::error::{BcviError, BcviResult};

/// 响应状态码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    /// greeting，accept 后立即发出
    Ready,
    /// 处理成功
    Success,
    /// 后随响应体（help 文档等）
    ResponseFollows,
    /// Auth-Key 缺失或不匹配
    PermissionDenied,
    /// Command 不在注册表中
    UnknownCommand,
}

impl ResponseCode {
    /// 三位数字码
    pub fn as_u16(self) -> u16 {
        match self {
            ResponseCode::Ready => 100,
            ResponseCode::Success => 200,
            ResponseCode::ResponseFollows => 300,
            ResponseCode::PermissionDenied => 900,
            ResponseCode::UnknownCommand => 910,
        }
    }

    /// 从数字码解析；未知码按协议错误处理
    pub fn from_u16(code: u16) -> BcviResult<Self> {
        match code {
            100 => Ok(ResponseCode::Ready),
            200 => Ok(ResponseCode::Success),
            300 => Ok(ResponseCode::ResponseFollows),
            900 => Ok(ResponseCode::PermissionDenied),
            910 => Ok(ResponseCode::UnknownCommand),
            other => Err(BcviError::protocol(format!("unknown response code {}", other))),
        }
    }

    /// 缺省状态短语
    pub fn default_message(self) -> &'static str {
        match self {
            ResponseCode::Ready => "Ready",
            ResponseCode::Success => "Success",
            ResponseCode::ResponseFollows => "Response follows",
            ResponseCode::PermissionDenied => "Permission denied",
            ResponseCode::UnknownCommand => "Unrecognised command",
        }
    }
}

/// 每连接一份的请求对象（服务端视角）
#[derive(Clone, Debug, Default)]
pub struct Request {
    /// 客户端出示的凭证
    pub auth_key: String,
    /// 自报的远程主机标签（不可信，仅用于显示与路径命名空间）
    pub host_alias: String,
    /// 要调用的 handler 名
    pub command: String,
    /// body 字节数
    pub content_length: usize,
    /// 头部之后的原始字节，由 handler 按命令解释
    pub body: Vec<u8>,
}

impl Request {
    /// 从规范化头部映射装配请求
    ///
    /// `content_length` 缺省为 0；其余字段缺省为空串，
    /// 认证阶段自然会拒绝空密钥
    pub fn from_headers(headers: &HashMap<String, String>) -> BcviResult<Self> {
        let content_length = match headers.get("content_length") {
            Some(v) => v
                .parse()
                .map_err(|_| BcviError::protocol(format!("invalid Content-Length: {:?}", v)))?,
            None => 0,
        };
        Ok(Self {
            auth_key: headers.get("auth_key").cloned().unwrap_or_default(),
            host_alias: headers.get("host_alias").cloned().unwrap_or_default(),
            command: headers.get("command").cloned().unwrap_or_default(),
            content_length,
            body: Vec::new(),
        })
    }

    /// body 按 LF 拆分为路径列表（尾部 LF 不产生空项）
    pub fn body_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.body)
            .split('\n')
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect()
    }
}

/// 带类型与长度的响应体（仅 300 携带）
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentBody {
    pub content_type: String,
    pub content: Vec<u8>,
}

/// 响应对象
#[derive(Clone, Debug)]
pub struct Response {
    pub code: ResponseCode,
    pub message: String,
    pub body: Option<DocumentBody>,
}

impl Response {
    /// 不带响应体的终结响应
    pub fn plain(code: ResponseCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            body: None,
        }
    }

    /// 300 + 响应体
    pub fn with_document(content_type: &str, content: Vec<u8>) -> Self {
        Self {
            code: ResponseCode::ResponseFollows,
            message: ResponseCode::ResponseFollows.default_message().to_string(),
            body: Some(DocumentBody {
                content_type: content_type.to_string(),
                content,
            }),
        }
    }

    /// 状态行文本（不含 LF）
    pub fn status_line(&self) -> String {
        format!("{} {}", self.code.as_u16(), self.message)
    }
}

/// 规范化头部名：小写、`-` 替换为 `_`
///
/// `HOST-ALIAS`、`Host-Alias`、`host_alias` 都会落到同一个键
pub fn canonical_header_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

/// 解析单行头部，空行返回 None 表示头部块结束
///
/// 值取第一个 `:` 之后的文本并去除首尾空白
pub fn parse_header_line(line: &str) -> BcviResult<Option<(String, String)>> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() {
        return Ok(None);
    }
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| BcviError::protocol(format!("malformed header line: {:?}", line)))?;
    Ok(Some((
        canonical_header_name(name),
        value.trim().to_string(),
    )))
}

/// 解析服务端状态行：`<code> <message>`
pub fn parse_status_line(line: &str) -> BcviResult<(ResponseCode, String)> {
    let line = line.trim_end_matches(['\n', '\r']);
    let (code_text, message) = match line.split_once(' ') {
        Some((c, m)) => (c, m.to_string()),
        None => (line, String::new()),
    };
    let numeric: u16 = code_text
        .parse()
        .map_err(|_| BcviError::protocol(format!("non-numeric response code: {:?}", line)))?;
    Ok((ResponseCode::from_u16(numeric)?, message))
}

/// 解析 greeting 并取出括号里的服务端版本
pub fn parse_greeting(line: &str) -> BcviResult<String> {
    let (code, message) = parse_status_line(line)?;
    if code != ResponseCode::Ready {
        return Err(BcviError::protocol(format!(
            "expected 100 greeting, got {}",
            code.as_u16()
        )));
    }
    let open = message.find('(');
    let close = message.rfind(')');
    match (open, close) {
        (Some(o), Some(c)) if c > o => Ok(message[o + 1..c].to_string()),
        _ => Err(BcviError::protocol(format!(
            "greeting carries no version: {:?}",
            message
        ))),
    }
}

/// 组装 greeting 行（不含 LF）
pub fn format_greeting(version: &str) -> String {
    format!("100 Ready ({})", version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_canonicalisation() {
        assert_eq!(canonical_header_name("HOST-ALIAS"), "host_alias");
        assert_eq!(canonical_header_name("Host-Alias"), "host_alias");
        assert_eq!(canonical_header_name("host_alias"), "host_alias");
        assert_eq!(canonical_header_name("Content-Length"), "content_length");
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = parse_header_line("Auth-Key: deadbeef\n").unwrap().unwrap();
        assert_eq!(name, "auth_key");
        assert_eq!(value, "deadbeef");
    }

    #[test]
    fn test_header_value_keeps_internal_colons() {
        let (name, value) = parse_header_line("Host-Alias: pluto:9").unwrap().unwrap();
        assert_eq!(name, "host_alias");
        assert_eq!(value, "pluto:9");
    }

    #[test]
    fn test_blank_line_ends_header_block() {
        assert!(parse_header_line("\n").unwrap().is_none());
        assert!(parse_header_line("").unwrap().is_none());
    }

    #[test]
    fn test_header_without_colon_is_protocol_error() {
        assert!(parse_header_line("garbage").is_err());
    }

    #[test]
    fn test_request_from_headers() {
        let mut headers = HashMap::new();
        headers.insert("auth_key".to_string(), "deadbeef".to_string());
        headers.insert("host_alias".to_string(), "pluto".to_string());
        headers.insert("command".to_string(), "vi".to_string());
        headers.insert("content_length".to_string(), "12".to_string());

        let req = Request::from_headers(&headers).unwrap();
        assert_eq!(req.auth_key, "deadbeef");
        assert_eq!(req.host_alias, "pluto");
        assert_eq!(req.command, "vi");
        assert_eq!(req.content_length, 12);
    }

    #[test]
    fn test_request_defaults_missing_length_to_zero() {
        let req = Request::from_headers(&HashMap::new()).unwrap();
        assert_eq!(req.content_length, 0);
    }

    #[test]
    fn test_request_rejects_bad_length() {
        let mut headers = HashMap::new();
        headers.insert("content_length".to_string(), "twelve".to_string());
        assert!(Request::from_headers(&headers).is_err());
    }

    #[test]
    fn test_body_lines_trailing_lf() {
        let req = Request {
            body: b"/etc/hosts\n+42\n".to_vec(),
            ..Request::default()
        };
        assert_eq!(req.body_lines(), vec!["/etc/hosts", "+42"]);
    }

    #[test]
    fn test_status_line_round_trip() {
        let resp = Response::plain(ResponseCode::Success);
        let (code, message) = parse_status_line(&resp.status_line()).unwrap();
        assert_eq!(code, ResponseCode::Success);
        assert_eq!(message, "Success");
    }

    #[test]
    fn test_non_numeric_code_is_fatal() {
        assert!(parse_status_line("OK fine").is_err());
    }

    #[test]
    fn test_unknown_code_is_fatal() {
        assert!(parse_status_line("500 Oops").is_err());
    }

    #[test]
    fn test_greeting_version_extraction() {
        let line = format_greeting("0.4.1");
        assert_eq!(parse_greeting(&line).unwrap(), "0.4.1");
    }

    #[test]
    fn test_greeting_without_version_is_fatal() {
        assert!(parse_greeting("100 Ready").is_err());
    }

    #[test]
    fn test_greeting_with_wrong_code_is_fatal() {
        assert!(parse_greeting("200 Success (1.0)").is_err());
    }
}
