//! 监听端引擎
//!
//! 启动序列对前任监听进程是原子的：先按信号升级干掉旧进程，
//! 再写入自己的 pid / 密钥 / 端口，然后进入单 accept 循环。
//! 每个连接在独立的 tokio 任务里处理，任务崩溃只影响该连接。

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::env::constants::VERSION;
use crate::config::store::default_port_for_current_user;
use crate::config::{ConfigStore, EnvConfig};
use crate::domain::protocol::{Response, ResponseCode};
use crate::error::BcviResult;
use crate::infra::wire;
use crate::services::handlers::{self, CommandRegistry};
use crate::state::{DigestKeyGenerator, KeyGenerator, ListenerContext};

/// 监听端启动选项
#[derive(Clone, Debug, Default)]
pub struct ListenerOptions {
    /// 端口覆盖（缺省按 uid 公式推导）
    pub port: Option<u16>,
    /// 保留磁盘上的上一个认证密钥
    pub reuse_auth: bool,
}

/// 监听端主入口：启动序列 + accept 循环
pub async fn run(options: ListenerOptions) -> Result<()> {
    let store = ConfigStore::open()?;
    store.load_env_file();
    let env = EnvConfig::from_env();

    // 1. 替换前任监听进程
    if let Some(pid) = store.read_pid() {
        replace_previous_listener(pid).await;
    }

    // 2. 落盘自己的 pid
    store.write_pid(std::process::id())?;

    // 3. 认证密钥
    let auth_key = resolve_auth_key(&store, options.reuse_auth);
    store.write_auth_key(&auth_key)?;

    // 4. 绑定端口并落盘
    let port = options.port.unwrap_or_else(default_port_for_current_user);
    let listener = bind_listener(env.listen_addr, port)
        .with_context(|| format!("failed to bind {}:{}", env.listen_addr, port))?;
    let bound_port = listener.local_addr()?.port();
    store.write_port(bound_port)?;

    // 5. 注册表：内建命令 + 插件
    let mut registry = CommandRegistry::with_builtins();
    registry.register_plugins(&store.plugin_dir());

    let ctx = Arc::new(ListenerContext {
        auth_key,
        port: bound_port,
        listen_addr: env.listen_addr,
        env,
        registry,
        store,
        started_at: Utc::now(),
    });

    info!(
        addr = %ctx.listen_addr,
        port = ctx.port,
        version = VERSION,
        "Listener ready"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    serve(listener, ctx, shutdown).await
}

/// 决定本次运行的认证密钥
fn resolve_auth_key(store: &ConfigStore, reuse: bool) -> String {
    if reuse {
        if let Some(key) = store.read_auth_key() {
            info!("Reusing previous auth key");
            return key;
        }
        warn!("--reuse-auth given but no key on disk, generating a fresh one");
    }
    DigestKeyGenerator.generate()
}

/// 带 SO_REUSEADDR 的绑定
///
/// 刚杀掉的前任可能留下 TIME_WAIT 状态的 socket
fn bind_listener(addr: IpAddr, port: u16) -> std::io::Result<TcpListener> {
    let socket = match addr {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::new(addr, port))?;
    socket.listen(64)
}

/// 向旧监听进程发信号并检查存活
///
/// 返回 true 表示进程已不存在
fn signal_and_check(pid: u32, sig: libc::c_int) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc == 0 {
        return false;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => true,
        Some(libc::EPERM) => {
            // 权限不够说明 pid 已被其它用户的进程复用，文件过期
            warn!(pid, "Stale pid file points at a foreign process, ignoring");
            true
        }
        _ => true,
    }
}

/// 信号升级替换前任：SIGHUP、1s、SIGHUP、SIGKILL、1s、SIGKILL
pub async fn replace_previous_listener(pid: u32) {
    if pid == std::process::id() {
        return;
    }

    info!(pid, "Replacing previous listener");

    const ESCALATION: &[(libc::c_int, u64)] = &[
        (libc::SIGHUP, 1),
        (libc::SIGHUP, 0),
        (libc::SIGKILL, 1),
        (libc::SIGKILL, 1),
    ];

    for &(sig, delay_secs) in ESCALATION {
        if signal_and_check(pid, sig) {
            debug!(pid, "Previous listener is gone");
            return;
        }
        if delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }
    }

    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        warn!(pid, "Previous listener survived SIGKILL escalation");
    }
}

/// 监听 SIGHUP / SIGTERM，触发优雅退出
///
/// SIGHUP 正是继任监听进程用来替换我们的信号
async fn watch_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = hup.recv() => info!("Received SIGHUP, shutting down"),
        _ = term.recv() => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

/// accept 循环
///
/// 单线程 accept，每个连接一个任务。accept 出错对监听端是致命的
/// （tokio 已在内部消化 EINTR）；在途任务不被打断，自行跑完
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ListenerContext>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Listener shutdown");
                return Ok(());
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let conn_id = Uuid::new_v4();
                        debug!(conn_id = %conn_id, peer = %peer, "New connection");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                debug!(conn_id = %conn_id, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        return Err(e.into());
                    }
                }
            }
        }
    }
}

/// 单连接处理序列：greeting → 请求 → 认证 → 派发 → 终结响应
async fn handle_connection(stream: TcpStream, ctx: Arc<ListenerContext>) -> BcviResult<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    wire::write_greeting(&mut writer, VERSION).await?;

    // --version 的客户端读完 greeting 就断开，这里的读失败属常态
    let request = wire::read_request(&mut reader).await?;

    if !ctx.verify_auth_key(&request.auth_key) {
        wire::write_response(&mut writer, &Response::plain(ResponseCode::PermissionDenied))
            .await?;
        warn!(host_alias = %request.host_alias, "Rejected request with a bad auth key");
        if atty::is(atty::Stream::Stderr) {
            eprintln!(
                "bcvi: rejected a request from '{}' carrying a bad auth key",
                request.host_alias
            );
        }
        return Ok(());
    }

    let spec = match ctx.registry.get(&request.command) {
        Some(spec) => spec.clone(),
        None => {
            warn!(command = %request.command, "Unrecognised command");
            wire::write_response(&mut writer, &Response::plain(ResponseCode::UnknownCommand))
                .await?;
            return Ok(());
        }
    };

    info!(
        command = %request.command,
        host_alias = %request.host_alias,
        bytes = request.content_length,
        "Dispatching"
    );

    match handlers::execute(&spec, &ctx, &request).await {
        Ok(Some(response)) => wire::write_response(&mut writer, &response).await?,
        Ok(None) => {
            wire::write_response(&mut writer, &Response::plain(ResponseCode::Success)).await?
        }
        Err(e) => {
            // handler 失败只结束本连接
            error!(command = %request.command, error = %e, "Handler failed");
            return Err(e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    fn test_context(key: &str) -> Arc<ListenerContext> {
        Arc::new(ListenerContext {
            auth_key: key.to_string(),
            port: 0,
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            env: EnvConfig::from_env(),
            registry: CommandRegistry::with_builtins(),
            store: ConfigStore::at(PathBuf::from("/nonexistent")),
            started_at: Utc::now(),
        })
    }

    async fn spawn_listener(ctx: Arc<ListenerContext>) -> (SocketAddr, CancellationToken) {
        let listener =
            bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).expect("bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = serve(listener, ctx, token).await;
        });
        (addr, shutdown)
    }

    async fn exchange(
        addr: SocketAddr,
        key: &str,
        command: &str,
        body: &[u8],
    ) -> (String, Response) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let version = wire::read_greeting(&mut reader).await.unwrap();
        wire::write_request(&mut write_half, key, "pluto", command, body)
            .await
            .unwrap();
        let response = wire::read_response(&mut reader).await.unwrap();
        (version, response)
    }

    #[tokio::test]
    async fn test_greeting_carries_version() {
        let (addr, shutdown) = spawn_listener(test_context("deadbeef")).await;
        let (version, _) = exchange(addr, "deadbeef", "commands_pod", b"").await;
        assert_eq!(version, VERSION);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_commands_pod_streams_docs() {
        let (addr, shutdown) = spawn_listener(test_context("deadbeef")).await;
        let (_, response) = exchange(addr, "deadbeef", "commands_pod", b"").await;
        assert_eq!(response.code, ResponseCode::ResponseFollows);
        let doc = response.body.unwrap();
        assert_eq!(doc.content_type, "text/pod");
        let text = String::from_utf8(doc.content).unwrap();
        assert!(text.contains("=head2 C<vi>"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_wrong_key_gets_900() {
        let (addr, shutdown) = spawn_listener(test_context("deadbeef")).await;
        let (_, response) = exchange(addr, "wrong", "vi", b"").await;
        assert_eq!(response.code, ResponseCode::PermissionDenied);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bit_flipped_key_gets_900() {
        let (addr, shutdown) = spawn_listener(test_context("deadbeef")).await;
        // 尾字节翻一位：f(0x66) -> g(0x67)
        let (_, response) = exchange(addr, "deadbeeg", "vi", b"").await;
        assert_eq!(response.code, ResponseCode::PermissionDenied);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_previous_key_rejected_after_restart() {
        // 非 reuse 重启后，旧密钥必须失效
        let (addr, shutdown) = spawn_listener(test_context("new-key")).await;
        let (_, response) = exchange(addr, "old-key", "commands_pod", b"").await;
        assert_eq!(response.code, ResponseCode::PermissionDenied);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_command_gets_910() {
        let (addr, shutdown) = spawn_listener(test_context("deadbeef")).await;
        let (_, response) = exchange(addr, "deadbeef", "nosuch", b"").await;
        assert_eq!(response.code, ResponseCode::UnknownCommand);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_greeting_only_client_does_not_kill_listener() {
        let (addr, shutdown) = spawn_listener(test_context("deadbeef")).await;

        // 模拟 --version：读完 greeting 即断开
        {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, _write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            wire::read_greeting(&mut reader).await.unwrap();
        }

        // 监听端必须继续服务后续连接
        let (_, response) = exchange(addr, "deadbeef", "commands_pod", b"").await;
        assert_eq!(response.code, ResponseCode::ResponseFollows);
        shutdown.cancel();
    }

    #[test]
    fn test_signal_check_on_dead_pid() {
        // 选一个几乎不可能存在的 pid
        assert!(signal_and_check(0x3FFF_FF00, 0));
    }

    #[tokio::test]
    async fn test_replace_skips_own_pid() {
        // 自己的 pid 出现在文件里时不应自杀
        replace_previous_listener(std::process::id()).await;
    }
}
