//! 命令执行器
//!
//! 提供统一的外部进程接口，支持：
//! - 分离式启动（编辑器等 GUI 进程，立即返回）
//! - 等待式执行（scp、远程安装等）
//!
//! 分离的子进程由后台任务回收，不会积累僵尸。

use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::debug;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
        }
    }
}

impl CommandRunner {
    /// 分离式启动
    ///
    /// 立即返回；子进程退出状态由后台任务回收并记入日志。
    /// 标准流全部断开，GUI 进程不会挂在监听端的终端上
    pub fn spawn_detached(program: &str, args: &[String]) -> Result<(), CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        let program = program.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(program = %program, status = ?status.code(), "Detached child exited"),
                Err(e) => debug!(program = %program, error = %e, "Failed to reap detached child"),
            }
        });

        Ok(())
    }

    /// 等待式执行
    ///
    /// 标准流继承自当前进程（scp 的进度与口令提示直达用户）
    pub async fn run_to_completion(
        program: &str,
        args: &[String],
    ) -> Result<ExitStatus, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        child.wait().await.map_err(CommandError::WaitFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_to_completion_success() {
        let status = CommandRunner::run_to_completion("true", &[]).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_run_to_completion_nonzero_exit() {
        let status = CommandRunner::run_to_completion("false", &[]).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_run_not_found() {
        let result = CommandRunner::run_to_completion("nonexistent_command_12345", &[]).await;
        assert!(matches!(result, Err(CommandError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_spawn_detached_returns_immediately() {
        CommandRunner::spawn_detached("sleep", &["0.05".to_string()]).unwrap();
    }
}
