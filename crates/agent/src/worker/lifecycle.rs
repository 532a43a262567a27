/// 虚拟机生命周期编排
///
/// Worker 连接时回滚快照并按需启动虚拟机，断开时关机。
/// 回滚和启动失败只写入监听器，不影响连接本身。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::models::constants::CURRENT_SNAPSHOT;
use common::{Error, Result, RevertPolicy, TaskHandle, TaskStatus, VmIdentity};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::datacenter::DatacenterRegistry;
use crate::hypervisor::{wait_for_completion, HypervisorApi, PollOptions};
use crate::launcher::{Launcher, LauncherKind};

use super::listener::TaskListener;

/// Worker 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Reverting,
    Starting,
    Connected,
    ShuttingDown,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Reverting => "reverting",
            WorkerState::Starting => "starting",
            WorkerState::Connected => "connected",
            WorkerState::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// Worker 运行参数，生命周期内只读
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub name: String,
    pub vm: VmIdentity,
    pub snapshot: String,
    pub revert_policy: RevertPolicy,
    pub start_vm: bool,
    pub post_action_wait: Duration,
    pub poll: PollOptions,
}

impl WorkerSettings {
    pub fn from_config(worker: &WorkerConfig, poll: PollOptions) -> Self {
        Self {
            name: worker.name.clone(),
            vm: worker.identity(),
            snapshot: worker.snapshot.clone(),
            revert_policy: worker.revert_policy,
            start_vm: worker.start_vm,
            post_action_wait: worker.post_action_wait(),
            poll,
        }
    }
}

/// 单个 Worker 的虚拟机生命周期
pub struct VmLifecycle {
    settings: WorkerSettings,
    registry: Arc<DatacenterRegistry>,
    launcher: Arc<dyn Launcher>,
    cancel: CancellationToken,
    state: RwLock<WorkerState>,
}

impl VmLifecycle {
    pub fn new(
        settings: WorkerSettings,
        registry: Arc<DatacenterRegistry>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            settings,
            registry,
            launcher,
            cancel: CancellationToken::new(),
            state: RwLock::new(WorkerState::Idle),
        }
    }

    /// 使用外部的取消令牌，通常是全局令牌的子令牌
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!("Worker {} 状态: {} -> {}", self.settings.name, *current, state);
            *current = state;
        }
    }

    /// 中断正在进行的等待，服务端任务不受影响
    #[cfg(test)]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 回连方式无法由本进程发起连接，但仍需执行回滚流程
    pub fn is_launch_supported(&self) -> bool {
        self.launcher.is_launch_supported() || self.launcher.kind() == LauncherKind::Inbound
    }

    /// 连接 Worker
    ///
    /// after_connect 策略先回滚和启动虚拟机，失败只记录；
    /// 连接方式自身的错误会返回给调用方
    pub async fn launch(&self, listener: &dyn TaskListener) -> Result<()> {
        if self.settings.revert_policy == RevertPolicy::AfterConnect {
            if let Err(e) = self.revert(listener).await {
                debug!("Worker {} 回滚未完成，继续连接: {}", self.settings.name, e);
            }
        }
        self.connect(listener).await
    }

    /// 只调用连接方式，不操作虚拟机
    pub async fn connect(&self, listener: &dyn TaskListener) -> Result<()> {
        match self.launcher.launch(&self.settings.name, listener).await {
            Ok(()) => {
                self.set_state(WorkerState::Connected).await;
                Ok(())
            }
            Err(e) => {
                listener.error(&format!("连接失败: {}", e));
                self.set_state(WorkerState::Idle).await;
                Err(e)
            }
        }
    }

    /// 回滚到快照，按需启动虚拟机，然后等待客户机就绪
    ///
    /// 错误已写入监听器，返回值供调用方区分中断
    pub async fn revert(&self, listener: &dyn TaskListener) -> Result<()> {
        self.set_state(WorkerState::Reverting).await;
        let result = self.revert_inner(listener).await;
        if let Err(e) = &result {
            report(listener, "回滚失败", e);
        }
        self.set_state(WorkerState::Idle).await;
        result
    }

    async fn revert_inner(&self, listener: &dyn TaskListener) -> Result<()> {
        let api = self.client()?;
        self.revert_snapshot(api.as_ref(), listener).await?;

        if self.settings.start_vm {
            self.set_state(WorkerState::Starting).await;
            self.start_vm_if_needed(api.as_ref(), listener).await?;
        }

        self.settle(listener).await
    }

    async fn revert_snapshot(&self, api: &dyn HypervisorApi, listener: &dyn TaskListener) -> Result<()> {
        let vm = &self.settings.vm;
        if self.settings.snapshot == CURRENT_SNAPSHOT {
            listener.info(&format!("虚拟机 {} 使用当前状态，跳过回滚", vm.vm_id));
            return Ok(());
        }

        listener.info(&format!(
            "虚拟机 {} ({}) 正在回滚到快照 {}",
            vm.vm_id, self.settings.name, self.settings.snapshot
        ));
        let task = api
            .rollback_snapshot(&vm.node, vm.vm_id, &self.settings.snapshot)
            .await?;
        listener.info(&format!("Proxmox 返回任务: {}", task));

        let status = self.wait(api, &task).await?;
        if status.is_success() {
            listener.info(&format!("回滚任务完成: {}", status));
        } else {
            listener.warn(&format!("回滚任务未成功: {}", status));
        }
        Ok(())
    }

    /// 虚拟机未运行时启动，返回是否发起了启动
    async fn start_vm_if_needed(
        &self,
        api: &dyn HypervisorApi,
        listener: &dyn TaskListener,
    ) -> Result<bool> {
        let vm = &self.settings.vm;
        if api.is_running(&vm.node, vm.vm_id).await? {
            debug!("虚拟机 {} 已在运行", vm);
            return Ok(false);
        }

        listener.info(&format!("启动虚拟机 {}", vm.vm_id));
        let task = api.start_vm(&vm.node, vm.vm_id).await?;
        let status = self.wait(api, &task).await?;
        listener.info(&format!("启动任务完成: {}", status));
        Ok(true)
    }

    /// 等待客户机启动服务，回连方式自己会等到 Agent 就绪
    async fn settle(&self, listener: &dyn TaskListener) -> Result<()> {
        let wait = self.settings.post_action_wait;
        if self.launcher.kind() == LauncherKind::Inbound || wait.is_zero() {
            return Ok(());
        }

        listener.info(&format!("等待 {} 秒后连接", wait.as_secs()));
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(Error::Interrupted("等待客户机就绪时被取消".to_string()))
            }
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Worker 断开前关闭虚拟机
    ///
    /// 只在 after_connect 策略下执行；优雅关机失败时强制停止。
    /// 尽力而为，错误只记录
    pub async fn before_disconnect(&self, listener: &dyn TaskListener) {
        if self.settings.revert_policy != RevertPolicy::AfterConnect {
            return;
        }

        self.set_state(WorkerState::ShuttingDown).await;
        if let Err(e) = self.shutdown(listener).await {
            report(listener, "关闭虚拟机失败", &e);
        }
        self.set_state(WorkerState::Idle).await;
    }

    async fn shutdown(&self, listener: &dyn TaskListener) -> Result<()> {
        let api = self.client()?;
        let vm = &self.settings.vm;

        listener.info(&format!("关闭虚拟机 {}", vm.vm_id));
        let task = api.shutdown_vm(&vm.node, vm.vm_id).await?;
        let status = self.wait(api.as_ref(), &task).await?;
        if status.is_success() {
            listener.info(&format!("关机完成: {}", status));
            return Ok(());
        }

        listener.warn(&format!("关机未成功 ({})，强制停止虚拟机 {}", status, vm.vm_id));
        let task = api.stop_vm(&vm.node, vm.vm_id).await?;
        let status = self.wait(api.as_ref(), &task).await?;
        listener.info(&format!("停止任务完成: {}", status));
        Ok(())
    }

    async fn wait(&self, api: &dyn HypervisorApi, task: &TaskHandle) -> Result<TaskStatus> {
        wait_for_completion(api, &self.settings.vm.node, task, &self.settings.poll, &self.cancel).await
    }

    fn client(&self) -> Result<Arc<dyn HypervisorApi>> {
        let datacenter = &self.settings.vm.datacenter_id;
        self.registry.resolve(datacenter).ok_or_else(|| {
            Error::NotFound(format!("找不到数据中心: {}", datacenter))
        })
    }
}

/// 中断记为警告，其余记为错误
fn report(listener: &dyn TaskListener, context: &str, error: &Error) {
    if error.is_interrupted() {
        listener.warn(&format!("{}: {}", context, error));
    } else {
        listener.error(&format!("{}: {}", context, error));
    }
    warn!("{}: {}", context, error);
}
