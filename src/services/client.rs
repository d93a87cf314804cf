//! 远端客户端引擎
//!
//! 一次调用一条连接：读 `BCVI_CONF`、拨号、收 greeting、发请求、
//! 解释终结响应，然后退出。严格串行，没有重试——用户重敲命令
//! 就是重试。

use std::env;
use std::path::Path;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::BackchannelConf;
use crate::domain::paths::{absolutize, is_line_directive};
use crate::domain::protocol::{Response, ResponseCode};
use crate::error::{BcviError, BcviResult};
use crate::infra::wire;

/// 客户端调用选项
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// 要调用的 handler（缺省 vi）
    pub command: String,
    /// 跳过绝对路径翻译
    pub no_path_xlate: bool,
    /// 位置参数（路径与 `+N` 指令）
    pub paths: Vec<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command: "vi".to_string(),
            no_path_xlate: false,
            paths: Vec::new(),
        }
    }
}

/// 组装请求 body
///
/// `+N` 指令永远原样放行；其余 token 在未禁用翻译时相对 cwd
/// 绝对化。每条路径一行，行尾 LF
pub fn build_body(paths: &[String], no_path_xlate: bool, cwd: &Path) -> Vec<u8> {
    let mut body = String::new();
    for token in paths {
        let line = if no_path_xlate || is_line_directive(token) {
            token.clone()
        } else {
            absolutize(cwd, token)
        };
        body.push_str(&line);
        body.push('\n');
    }
    body.into_bytes()
}

/// 发送一条命令并返回终结响应
///
/// 900 / 910 映射为错误；300 的响应体原样带回给调用方
/// （`--help` 用它渲染服务端命令文档）
pub async fn send_command(options: &ClientOptions) -> BcviResult<Response> {
    let conf = BackchannelConf::from_env()?;
    send_command_with_conf(&conf, options).await
}

/// 用显式描述符发送（测试与 wrapper 内部复用）
pub async fn send_command_with_conf(
    conf: &BackchannelConf,
    options: &ClientOptions,
) -> BcviResult<Response> {
    let stream = TcpStream::connect((conf.gateway.as_str(), conf.port)).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let server_version = wire::read_greeting(&mut reader).await?;
    debug!(server_version = %server_version, "Connected to listener");

    let cwd = env::current_dir()?;
    let body = build_body(&options.paths, options.no_path_xlate, &cwd);

    wire::write_request(
        &mut write_half,
        &conf.auth_key,
        &conf.host_alias,
        &options.command,
        &body,
    )
    .await?;

    let response = wire::read_response(&mut reader).await?;
    match response.code {
        ResponseCode::Success | ResponseCode::ResponseFollows => Ok(response),
        ResponseCode::PermissionDenied => Err(BcviError::Denied(response.message)),
        ResponseCode::UnknownCommand => Err(BcviError::UnknownCommand(response.message)),
        ResponseCode::Ready => Err(BcviError::protocol("unexpected second greeting")),
    }
}

/// 只读 greeting 拿服务端版本，不发送请求
pub async fn server_version() -> BcviResult<String> {
    let conf = BackchannelConf::from_env()?;
    server_version_with_conf(&conf).await
}

/// 用显式描述符取服务端版本
pub async fn server_version_with_conf(conf: &BackchannelConf) -> BcviResult<String> {
    let stream = TcpStream::connect((conf.gateway.as_str(), conf.port)).await?;
    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    wire::read_greeting(&mut reader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::Request;
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    #[test]
    fn test_build_body_translates_relative_paths() {
        let cwd = PathBuf::from("/home/u/work");
        let body = build_body(
            &["+42".to_string(), "README".to_string()],
            false,
            &cwd,
        );
        assert_eq!(body, b"+42\n/home/u/work/README\n");
    }

    #[test]
    fn test_build_body_keeps_absolute_paths() {
        let cwd = PathBuf::from("/home/u");
        let body = build_body(&["/etc/hosts".to_string()], false, &cwd);
        assert_eq!(body, b"/etc/hosts\n");
    }

    #[test]
    fn test_build_body_no_xlate() {
        let cwd = PathBuf::from("/home/u");
        let body = build_body(&["README".to_string()], true, &cwd);
        assert_eq!(body, b"README\n");
    }

    #[test]
    fn test_build_body_empty() {
        assert!(build_body(&[], false, &PathBuf::from("/")).is_empty());
    }

    /// 起一个只认 "deadbeef" 的极简服务端，返回其地址
    async fn spawn_stub_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    wire::write_greeting(&mut write_half, "9.9.9").await.unwrap();
                    let request: Request = match wire::read_request(&mut reader).await {
                        Ok(r) => r,
                        Err(_) => return,
                    };
                    let response = if request.auth_key != "deadbeef" {
                        Response::plain(ResponseCode::PermissionDenied)
                    } else if request.command == "commands_pod" {
                        Response::with_document("text/pod", b"=head2 C<vi>\n".to_vec())
                    } else if request.command == "vi" {
                        Response::plain(ResponseCode::Success)
                    } else {
                        Response::plain(ResponseCode::UnknownCommand)
                    };
                    let _ = wire::write_response(&mut write_half, &response).await;
                });
            }
        });

        addr
    }

    fn conf_for(addr: std::net::SocketAddr, key: &str) -> BackchannelConf {
        BackchannelConf {
            host_alias: "pluto".to_string(),
            gateway: "127.0.0.1".to_string(),
            port: addr.port(),
            auth_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_round_trip() {
        let addr = spawn_stub_server().await;
        let options = ClientOptions {
            paths: vec!["/etc/hosts".to_string()],
            ..ClientOptions::default()
        };
        let response = send_command_with_conf(&conf_for(addr, "deadbeef"), &options)
            .await
            .unwrap();
        assert_eq!(response.code, ResponseCode::Success);
    }

    #[tokio::test]
    async fn test_denied_maps_to_error() {
        let addr = spawn_stub_server().await;
        let err = send_command_with_conf(&conf_for(addr, "wrong"), &ClientOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BcviError::Denied(_)));
    }

    #[tokio::test]
    async fn test_unknown_command_maps_to_error() {
        let addr = spawn_stub_server().await;
        let options = ClientOptions {
            command: "nosuch".to_string(),
            ..ClientOptions::default()
        };
        let err = send_command_with_conf(&conf_for(addr, "deadbeef"), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, BcviError::UnknownCommand(_)));
    }

    #[tokio::test]
    async fn test_document_response_comes_back() {
        let addr = spawn_stub_server().await;
        let options = ClientOptions {
            command: "commands_pod".to_string(),
            ..ClientOptions::default()
        };
        let response = send_command_with_conf(&conf_for(addr, "deadbeef"), &options)
            .await
            .unwrap();
        assert_eq!(response.code, ResponseCode::ResponseFollows);
        assert!(response.body.is_some());
    }

    #[tokio::test]
    async fn test_server_version_uses_greeting_only() {
        let addr = spawn_stub_server().await;
        let version = server_version_with_conf(&conf_for(addr, "irrelevant"))
            .await
            .unwrap();
        assert_eq!(version, "9.9.9");
    }

    #[tokio::test]
    async fn test_connection_refused_surfaces_io_error() {
        // 没人监听的端口
        let conf = BackchannelConf {
            host_alias: "pluto".to_string(),
            gateway: "127.0.0.1".to_string(),
            port: 1,
            auth_key: "k".to_string(),
        };
        let err = send_command_with_conf(&conf, &ClientOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BcviError::Io(_)));
    }
}
