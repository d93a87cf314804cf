//! 路径翻译
//!
//! 客户端侧：把相对路径变成绝对路径，`+N` 行号指令原样放行。
//! 监听端侧：把远端绝对路径改写到本地可达的形式。

use std::path::{Path, PathBuf};

/// `+N` 行号指令判定（`+` 后全为数字，至少一位）
pub fn is_line_directive(token: &str) -> bool {
    match token.strip_prefix('+') {
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// 相对于 cwd 绝对化一个 token
///
/// 已经是绝对路径或 `+N` 指令时原样返回（幂等）。不做
/// canonicalize：被编辑的文件可能尚不存在
pub fn absolutize(cwd: &Path, token: &str) -> String {
    if is_line_directive(token) {
        return token.to_string();
    }
    let p = Path::new(token);
    if p.is_absolute() {
        token.to_string()
    } else {
        cwd.join(p).to_string_lossy().into_owned()
    }
}

/// 监听端路径改写策略
///
/// 缺省使用文档化的 `scp://<alias><path>` 形式；
/// `mount:<prefix>` 恢复本地挂载约定（`<prefix>/<alias><path>`）
#[derive(Clone, Debug, PartialEq)]
pub enum PathRewrite {
    /// `scp://pluto/etc/hosts`
    ScpUri,
    /// `/tmp/pluto/etc/hosts`（前缀可配）
    Mount(PathBuf),
}

impl PathRewrite {
    /// 从配置字符串解析：`scp` 或 `mount:<prefix>`
    ///
    /// 无法识别的值回退到缺省并告警
    pub fn from_str(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("scp") || s.is_empty() {
            return PathRewrite::ScpUri;
        }
        if let Some(prefix) = s.strip_prefix("mount:") {
            if !prefix.is_empty() {
                return PathRewrite::Mount(PathBuf::from(prefix));
            }
        }
        tracing::warn!(value = %s, "Unrecognised BCVI_PATH_REWRITE, using scp:// form");
        PathRewrite::ScpUri
    }

    /// 把远端路径改写为本地编辑器可打开的形式
    ///
    /// `+N` 指令不改写。相对路径（不应出现，客户端已绝对化）
    /// 按斜杠前缀补齐后处理
    pub fn rewrite(&self, host_alias: &str, token: &str) -> String {
        if is_line_directive(token) {
            return token.to_string();
        }
        let absolute = if token.starts_with('/') {
            token.to_string()
        } else {
            format!("/{}", token)
        };
        match self {
            PathRewrite::ScpUri => format!("scp://{}{}", host_alias, absolute),
            PathRewrite::Mount(prefix) => {
                format!("{}/{}{}", prefix.display(), host_alias, absolute)
            }
        }
    }
}

impl Default for PathRewrite {
    fn default() -> Self {
        PathRewrite::ScpUri
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_directive_detection() {
        assert!(is_line_directive("+42"));
        assert!(is_line_directive("+1"));
        assert!(!is_line_directive("+"));
        assert!(!is_line_directive("+4x"));
        assert!(!is_line_directive("42"));
        assert!(!is_line_directive("README"));
    }

    #[test]
    fn test_absolutize_relative() {
        assert_eq!(absolutize(Path::new("/home/u"), "README"), "/home/u/README");
    }

    #[test]
    fn test_absolutize_is_idempotent_on_absolute() {
        assert_eq!(absolutize(Path::new("/home/u"), "/etc/hosts"), "/etc/hosts");
    }

    #[test]
    fn test_absolutize_passes_line_directives() {
        assert_eq!(absolutize(Path::new("/home/u"), "+42"), "+42");
    }

    #[test]
    fn test_scp_uri_rewrite() {
        let rw = PathRewrite::ScpUri;
        assert_eq!(rw.rewrite("pluto", "/etc/hosts"), "scp://pluto/etc/hosts");
    }

    #[test]
    fn test_mount_rewrite() {
        let rw = PathRewrite::Mount(PathBuf::from("/tmp"));
        assert_eq!(rw.rewrite("pluto", "/etc/hosts"), "/tmp/pluto/etc/hosts");
    }

    #[test]
    fn test_rewrite_passes_line_directives() {
        let rw = PathRewrite::Mount(PathBuf::from("/tmp"));
        assert_eq!(rw.rewrite("pluto", "+42"), "+42");
    }

    #[test]
    fn test_rewrite_from_str() {
        assert_eq!(PathRewrite::from_str("scp"), PathRewrite::ScpUri);
        assert_eq!(
            PathRewrite::from_str("mount:/tmp"),
            PathRewrite::Mount(PathBuf::from("/tmp"))
        );
        assert_eq!(PathRewrite::from_str("bogus"), PathRewrite::ScpUri);
        assert_eq!(PathRewrite::from_str("mount:"), PathRewrite::ScpUri);
    }
}
