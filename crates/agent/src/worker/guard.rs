/// 任务触发的回滚
///
/// before_every_job 策略下，Worker 每接受一个任务都先断开、回滚、再重新连接。
/// 回滚期间平台发起的自动重连会被忽略。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{Result, RevertPolicy};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::launcher::WorkerChannel;

use super::lifecycle::VmLifecycle;
use super::listener::TaskListener;

/// 离开作用域时清除回滚标记
struct Reverting<'a>(&'a AtomicBool);

impl Drop for Reverting<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RevertGuard {
    lifecycle: Arc<VmLifecycle>,
    channel: Arc<dyn WorkerChannel>,
    reverting: AtomicBool,
    /// 自动重连与任务前回滚互斥，回滚不会和进行中的连接交错
    connecting: Mutex<()>,
}

impl RevertGuard {
    pub fn new(lifecycle: Arc<VmLifecycle>, channel: Arc<dyn WorkerChannel>) -> Self {
        Self {
            lifecycle,
            channel,
            reverting: AtomicBool::new(false),
            connecting: Mutex::new(()),
        }
    }

    pub fn lifecycle(&self) -> &Arc<VmLifecycle> {
        &self.lifecycle
    }

    pub fn is_reverting(&self) -> bool {
        self.reverting.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.is_connected().await
    }

    /// Worker 接受了一个任务
    ///
    /// 顺序执行断开、回滚、重新连接。断开失败或回滚被中断时放弃后续步骤，
    /// 其他回滚错误只记录，仍然重新连接
    pub async fn on_task_accepted(&self, listener: &dyn TaskListener) -> Result<()> {
        let settings = self.lifecycle.settings();
        if settings.revert_policy != RevertPolicy::BeforeEveryJob
            || !self.lifecycle.is_launch_supported()
        {
            return Ok(());
        }

        if self
            .reverting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            listener.warn(&format!("Worker {} 正在回滚，忽略本次任务触发", settings.name));
            return Ok(());
        }
        let _reverting = Reverting(&self.reverting);
        // 等待进行中的重连结束，它启动的 Agent 会在下面被断开
        let _connecting = self.connecting.lock().await;

        info!("🔁 任务开始前回滚 Worker: {}", settings.name);
        listener.info(&format!("断开 Worker {} 以回滚快照", settings.name));
        if let Err(e) = self.channel.disconnect(&settings.name, listener).await {
            listener.error(&format!("断开 Worker 失败: {}", e));
            return Err(e);
        }

        if let Err(e) = self.lifecycle.revert(listener).await {
            if e.is_interrupted() {
                return Err(e);
            }
        }

        self.lifecycle.connect(listener).await
    }

    /// 平台的自动重连
    ///
    /// 回滚进行中时只记录不执行，返回是否执行了连接
    pub async fn reconnect(&self, listener: &dyn TaskListener) -> Result<bool> {
        if self.suppress_reconnect(listener) {
            return Ok(false);
        }
        let _connecting = self.connecting.lock().await;
        if self.suppress_reconnect(listener) {
            return Ok(false);
        }

        self.lifecycle.launch(listener).await?;
        Ok(true)
    }

    fn suppress_reconnect(&self, listener: &dyn TaskListener) -> bool {
        if !self.is_reverting() {
            return false;
        }
        let name = &self.lifecycle.settings().name;
        debug!("Worker {} 回滚中，忽略自动重连", name);
        listener.info(&format!("Worker {} 正在回滚快照，忽略自动重连", name));
        true
    }

    /// Worker 下线：先按策略关闭虚拟机，再断开连接
    pub async fn disconnect(&self, listener: &dyn TaskListener) -> Result<()> {
        self.lifecycle.before_disconnect(listener).await;
        self.channel
            .disconnect(&self.lifecycle.settings().name, listener)
            .await
    }
}
