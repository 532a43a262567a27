/// 命令方式连接
///
/// 通过 `sh -c` 执行配置的命令启动 Agent 进程，进程存活期间视为已连接

use std::process::Stdio;

use async_trait::async_trait;
use common::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Launcher, LauncherKind, WorkerChannel};
use crate::worker::listener::TaskListener;

pub struct CommandLauncher {
    command: String,
    child: Mutex<Option<Child>>,
}

impl CommandLauncher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Command
    }

    fn is_launch_supported(&self) -> bool {
        true
    }

    async fn launch(&self, worker: &str, listener: &dyn TaskListener) -> Result<()> {
        let mut child = self.child.lock().await;
        if let Some(process) = child.as_mut() {
            if matches!(process.try_wait(), Ok(None)) {
                listener.info(&format!("Agent 进程已在运行: {}", worker));
                return Ok(());
            }
        }

        listener.info(&format!("启动 Agent: {}", self.command));
        let mut process = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("无法执行命令 {}: {}", self.command, e)))?;

        if let Some(stdout) = process.stdout.take() {
            let worker = worker.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = %worker, "agent> {}", line);
                }
            });
        }

        info!("🚀 Agent 进程已启动: worker={}, pid={:?}", worker, process.id());
        *child = Some(process);
        Ok(())
    }
}

#[async_trait]
impl WorkerChannel for CommandLauncher {
    async fn disconnect(&self, worker: &str, listener: &dyn TaskListener) -> Result<()> {
        let Some(mut process) = self.child.lock().await.take() else {
            debug!("Worker {} 没有运行中的 Agent 进程", worker);
            return Ok(());
        };

        if let Ok(Some(status)) = process.try_wait() {
            listener.info(&format!("Agent 进程已退出: {}", status));
            return Ok(());
        }

        process
            .kill()
            .await
            .map_err(|e| Error::Internal(format!("无法结束 Agent 进程: {}", e)))?;
        warn!("🔌 已断开 Worker: {}", worker);
        listener.info(&format!("已断开 Worker {}", worker));
        Ok(())
    }

    /// Agent 进程是否仍在运行
    async fn is_connected(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(process) => matches!(process.try_wait(), Ok(None)),
            None => false,
        }
    }
}
