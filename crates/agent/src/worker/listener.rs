/// Worker 日志监听器
///
/// 生命周期操作的用户可见输出，每行带有级别前缀

use std::fmt;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn prefix(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// 生成一行监听器输出: `WARNING: ...`
pub fn format_line(severity: Severity, message: &str) -> String {
    format!("{}: {}", severity.prefix(), message)
}

/// 日志监听器接口
pub trait TaskListener: Send + Sync {
    fn log(&self, severity: Severity, message: &str);

    fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }
}

/// 转发到 tracing 的监听器
pub struct LogListener {
    worker: String,
}

impl LogListener {
    pub fn new(worker: impl Into<String>) -> Self {
        Self { worker: worker.into() }
    }
}

impl TaskListener for LogListener {
    fn log(&self, severity: Severity, message: &str) {
        let line = format_line(severity, message);
        match severity {
            Severity::Info => info!(worker = %self.worker, "{}", line),
            Severity::Warning => warn!(worker = %self.worker, "{}", line),
            Severity::Error => error!(worker = %self.worker, "{}", line),
        }
    }
}

/// 同时写入 tracing 和标准输出，供命令行交互使用
pub struct ConsoleListener {
    inner: LogListener,
}

impl ConsoleListener {
    pub fn new(worker: impl Into<String>) -> Self {
        Self { inner: LogListener::new(worker) }
    }
}

impl TaskListener for ConsoleListener {
    fn log(&self, severity: Severity, message: &str) {
        self.inner.log(severity, message);
        println!("{}", format_line(severity, message));
    }
}

#[cfg(test)]
pub use capture::CaptureListener;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_prefixes() {
        let listener = CaptureListener::new();
        listener.info("回滚完成");
        listener.warn("等待被中断");
        listener.error("认证失败");

        assert_eq!(
            listener.lines(),
            vec!["INFO: 回滚完成", "WARNING: 等待被中断", "ERROR: 认证失败"]
        );
        assert!(listener.has(Severity::Warning));
    }

    #[test]
    fn test_log_listener_does_not_panic_without_subscriber() {
        let listener = LogListener::new("build-01");
        listener.info("hello");
        listener.error("boom");
    }
}
