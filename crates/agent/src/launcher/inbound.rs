/// 回连方式
///
/// Agent 在虚拟机内启动后主动连接控制器，本进程不能发起连接

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::Result;
use tracing::info;

use super::{Launcher, LauncherKind, WorkerChannel};
use crate::worker::listener::TaskListener;

#[derive(Default)]
pub struct InboundLauncher {
    expecting: AtomicBool,
}

impl InboundLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Launcher for InboundLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Inbound
    }

    fn is_launch_supported(&self) -> bool {
        false
    }

    async fn launch(&self, worker: &str, listener: &dyn TaskListener) -> Result<()> {
        self.expecting.store(true, Ordering::SeqCst);
        listener.info(&format!("等待 Agent 回连: {}", worker));
        Ok(())
    }
}

#[async_trait]
impl WorkerChannel for InboundLauncher {
    async fn disconnect(&self, worker: &str, listener: &dyn TaskListener) -> Result<()> {
        if self.expecting.swap(false, Ordering::SeqCst) {
            info!("🔌 已断开回连 Worker: {}", worker);
        }
        listener.info(&format!("已断开 Worker {}", worker));
        Ok(())
    }

    /// 回连由 Agent 发起，这里只表示是否在等待回连
    async fn is_connected(&self) -> bool {
        self.expecting.load(Ordering::SeqCst)
    }
}
