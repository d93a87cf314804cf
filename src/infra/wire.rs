//! 回传协议的异步线上读写
//!
//! 领域层负责纯解析，这里只做成帧 IO：按 LF 读行、按
//! Content-Length 精确读 body。两端（客户端与监听端）共用。

use std::collections::HashMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::protocol::{
    self, DocumentBody, Request, Response, ResponseCode,
};
use crate::error::{BcviError, BcviResult};

/// 读一行（含 LF）；EOF 视为协议截断
async fn read_line<R>(reader: &mut R) -> BcviResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(BcviError::protocol("connection closed mid-exchange"));
    }
    Ok(line)
}

/// 读头部块直到空行，键已规范化
pub async fn read_header_block<R>(reader: &mut R) -> BcviResult<HashMap<String, String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HashMap::new();
    loop {
        let line = read_line(reader).await?;
        match protocol::parse_header_line(&line)? {
            Some((name, value)) => {
                headers.insert(name, value);
            }
            None => return Ok(headers),
        }
    }
}

/// 精确读取 len 字节 body；不足即截断错误
pub async fn read_exact_body<R>(reader: &mut R, len: usize) -> BcviResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| BcviError::protocol(format!("body truncated before {} bytes", len)))?;
    Ok(body)
}

/// 写 greeting
pub async fn write_greeting<W>(writer: &mut W, version: &str) -> BcviResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{}\n", protocol::format_greeting(version)).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

/// 读 greeting，返回服务端版本
pub async fn read_greeting<R>(reader: &mut R) -> BcviResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    protocol::parse_greeting(&line)
}

/// 写完整请求：头部、空行、body
pub async fn write_request<W>(
    writer: &mut W,
    auth_key: &str,
    host_alias: &str,
    command: &str,
    body: &[u8],
) -> BcviResult<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "Auth-Key: {}\nHost-Alias: {}\nCommand: {}\nContent-Length: {}\n\n",
        auth_key,
        host_alias,
        command,
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// 读完整请求（头部块 + 精确长度的 body）
pub async fn read_request<R>(reader: &mut R) -> BcviResult<Request>
where
    R: AsyncBufRead + Unpin,
{
    let headers = read_header_block(reader).await?;
    let mut request = Request::from_headers(&headers)?;
    request.body = read_exact_body(reader, request.content_length).await?;
    Ok(request)
}

/// 写响应：状态行，300 时再写头部块与 body
pub async fn write_response<W>(writer: &mut W, response: &Response) -> BcviResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{}\n", response.status_line()).as_bytes())
        .await?;
    if let Some(doc) = &response.body {
        let head = format!(
            "Content-Length: {}\nContent-Type: {}\n\n",
            doc.content.len(),
            doc.content_type
        );
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(&doc.content).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// 读响应；300 时继续读后随头部块与 body
pub async fn read_response<R>(reader: &mut R) -> BcviResult<Response>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let (code, message) = protocol::parse_status_line(&line)?;

    let body = if code == ResponseCode::ResponseFollows {
        let headers = read_header_block(reader).await?;
        let len: usize = headers
            .get("content_length")
            .ok_or_else(|| BcviError::protocol("300 response without Content-Length"))?
            .parse()
            .map_err(|_| BcviError::protocol("invalid Content-Length in 300 response"))?;
        let content_type = headers
            .get("content_type")
            .cloned()
            .unwrap_or_else(|| "text/plain".to_string());
        let content = read_exact_body(reader, len).await?;
        Some(DocumentBody {
            content_type,
            content,
        })
    } else {
        None
    };

    Ok(Response {
        code,
        message,
        body,
    })
}
