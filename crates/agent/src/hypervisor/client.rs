/// Proxmox Hypervisor 客户端
///
/// 基于认证会话封装节点、虚拟机、快照和任务相关的 API

use std::collections::HashMap;

use async_trait::async_trait;
use common::{Result, TaskHandle, TaskStatus, VmStatus};
use serde::Deserialize;
use tracing::{debug, info};

use super::session::PveSession;

/// Hypervisor 操作接口
///
/// 所有方法在凭据失败时返回 `Authentication`，其余失败为 `Transport`/`Protocol`，
/// 除会话自身的重新登录外不做重试
#[async_trait]
pub trait HypervisorApi: Send + Sync + 'static {
    /// 列出集群节点
    async fn list_nodes(&self) -> Result<Vec<String>>;

    /// 列出节点上的虚拟机：名称 -> VMID，重名时保留最后一个
    async fn list_vms(&self, node: &str) -> Result<HashMap<String, u32>>;

    /// 获取虚拟机状态
    async fn get_vm_status(&self, node: &str, vm_id: u32) -> Result<VmStatus>;

    /// 虚拟机是否在运行
    async fn is_running(&self, node: &str, vm_id: u32) -> Result<bool> {
        Ok(self.get_vm_status(node, vm_id).await?.is_running())
    }

    /// 列出快照名称
    async fn list_snapshots(&self, node: &str, vm_id: u32) -> Result<Vec<String>>;

    /// 回滚到快照
    ///
    /// 不对 "current" 做特殊处理，由调用方跳过
    async fn rollback_snapshot(&self, node: &str, vm_id: u32, snapshot: &str) -> Result<TaskHandle>;

    /// 启动虚拟机
    async fn start_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle>;

    /// 强制停止虚拟机
    async fn stop_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle>;

    /// 优雅关机
    async fn shutdown_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle>;

    /// 查询任务状态
    async fn get_task_status(&self, node: &str, task: &TaskHandle) -> Result<TaskStatus>;
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    node: String,
}

#[derive(Debug, Deserialize)]
struct QemuEntry {
    vmid: u32,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotEntry {
    name: String,
}

/// Proxmox REST 客户端
pub struct PveClient {
    session: PveSession,
}

impl PveClient {
    pub fn new(session: PveSession) -> Self {
        Self { session }
    }

    async fn vm_action(&self, node: &str, vm_id: u32, action: &str) -> Result<TaskHandle> {
        info!("⚙️ 虚拟机操作: node={}, vmid={}, action={}", node, vm_id, action);
        let upid: String = self
            .session
            .post(&format!("nodes/{}/qemu/{}/status/{}", node, vm_id, action))
            .await?;
        debug!("任务已创建: {}", upid);
        Ok(TaskHandle::new(upid))
    }
}

#[async_trait]
impl HypervisorApi for PveClient {
    async fn list_nodes(&self) -> Result<Vec<String>> {
        let nodes: Vec<NodeEntry> = self.session.get("nodes").await?;
        Ok(nodes.into_iter().map(|n| n.node).collect())
    }

    async fn list_vms(&self, node: &str) -> Result<HashMap<String, u32>> {
        let vms: Vec<QemuEntry> = self.session.get(&format!("nodes/{}/qemu", node)).await?;
        Ok(vms
            .into_iter()
            .map(|vm| {
                let name = vm.name.unwrap_or_else(|| format!("VM {}", vm.vmid));
                (name, vm.vmid)
            })
            .collect())
    }

    async fn get_vm_status(&self, node: &str, vm_id: u32) -> Result<VmStatus> {
        self.session
            .get(&format!("nodes/{}/qemu/{}/status/current", node, vm_id))
            .await
    }

    async fn list_snapshots(&self, node: &str, vm_id: u32) -> Result<Vec<String>> {
        let snapshots: Vec<SnapshotEntry> = self
            .session
            .get(&format!("nodes/{}/qemu/{}/snapshot", node, vm_id))
            .await?;
        Ok(snapshots.into_iter().map(|s| s.name).collect())
    }

    async fn rollback_snapshot(&self, node: &str, vm_id: u32, snapshot: &str) -> Result<TaskHandle> {
        info!("⏪ 回滚快照: node={}, vmid={}, snapshot={}", node, vm_id, snapshot);
        let upid: String = self
            .session
            .post(&format!(
                "nodes/{}/qemu/{}/snapshot/{}/rollback",
                node, vm_id, snapshot
            ))
            .await?;
        Ok(TaskHandle::new(upid))
    }

    async fn start_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle> {
        self.vm_action(node, vm_id, "start").await
    }

    async fn stop_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle> {
        self.vm_action(node, vm_id, "stop").await
    }

    async fn shutdown_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle> {
        self.vm_action(node, vm_id, "shutdown").await
    }

    async fn get_task_status(&self, node: &str, task: &TaskHandle) -> Result<TaskStatus> {
        self.session
            .get(&format!("nodes/{}/tasks/{}/status", node, task))
            .await
    }
}
