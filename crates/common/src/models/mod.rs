/// 共享数据模型
///
/// 定义 Hypervisor 客户端与 Worker 生命周期编排共享的数据结构

use serde::{Deserialize, Serialize};
use std::fmt;

/// 快照回滚策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevertPolicy {
    /// 每次连接 Worker 时回滚一次
    #[default]
    AfterConnect,
    /// 每个任务执行前回滚
    BeforeEveryJob,
}

impl fmt::Display for RevertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfterConnect => write!(f, "after_connect"),
            Self::BeforeEveryJob => write!(f, "before_every_job"),
        }
    }
}

/// 虚拟机标识：数据中心 + 集群节点 + VMID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VmIdentity {
    pub datacenter_id: String,
    pub node: String,
    pub vm_id: u32,
}

impl VmIdentity {
    pub fn new(datacenter_id: impl Into<String>, node: impl Into<String>, vm_id: u32) -> Self {
        Self {
            datacenter_id: datacenter_id.into(),
            node: node.into(),
            vm_id,
        }
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.node, self.vm_id, self.datacenter_id)
    }
}

/// 服务端异步任务句柄 (UPID)
///
/// 由操作调用产生，轮询到结束后丢弃，不复用。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(upid: impl Into<String>) -> Self {
        Self(upid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// 任务状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatus {
    #[serde(rename = "status")]
    pub state: TaskState,

    /// 仅在任务结束后出现，"OK" 表示成功
    #[serde(rename = "exitstatus", default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upid: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl TaskStatus {
    pub fn running() -> Self {
        Self {
            state: TaskState::Running,
            exit_status: None,
            upid: None,
            task_type: None,
            node: None,
        }
    }

    pub fn stopped(exit_status: impl Into<String>) -> Self {
        Self {
            state: TaskState::Stopped,
            exit_status: Some(exit_status.into()),
            ..Self::running()
        }
    }

    /// 状态不再是 running 即视为结束
    pub fn is_terminal(&self) -> bool {
        self.state != TaskState::Running
    }

    pub fn is_success(&self) -> bool {
        self.is_terminal() && self.exit_status.as_deref() == Some(constants::TASK_EXIT_OK)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            TaskState::Running => "running",
            TaskState::Stopped => "stopped",
            TaskState::Unknown => "unknown",
        };
        write!(f, "status={}", state)?;
        if let Some(exit) = &self.exit_status {
            write!(f, ", exitstatus={}", exit)?;
        }
        if let Some(upid) = &self.upid {
            write!(f, ", upid={}", upid)?;
        }
        Ok(())
    }
}

/// 虚拟机电源状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VmPowerState {
    Running,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// 虚拟机状态 (`status/current`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmStatus {
    pub status: VmPowerState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qmpstatus: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

impl VmStatus {
    pub fn is_running(&self) -> bool {
        self.status == VmPowerState::Running
    }
}

/// 常量定义
pub mod constants {
    /// Proxmox API 默认端口
    pub const DEFAULT_API_PORT: u16 = 8006;

    /// 认证票据有效期（秒），Proxmox 票据 2 小时过期
    pub const TICKET_LIFETIME_SECS: u64 = 2 * 60 * 60;

    /// 表示"当前状态"的快照名，不执行回滚
    pub const CURRENT_SNAPSHOT: &str = "current";

    /// 任务成功的退出状态
    pub const TASK_EXIT_OK: &str = "OK";

    /// 默认任务轮询间隔（毫秒）
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// 默认 HTTP 请求超时（秒）
    pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

    /// 当前配置文件版本
    pub const CONFIG_VERSION: u32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_status_terminal() {
        let running: TaskStatus = serde_json::from_value(json!({"status": "running"})).unwrap();
        assert!(!running.is_terminal());
        assert!(!running.is_success());

        let ok: TaskStatus = serde_json::from_value(json!({
            "status": "stopped",
            "exitstatus": "OK",
            "type": "qmstart",
            "pid": 1234,
        }))
        .unwrap();
        assert!(ok.is_terminal());
        assert!(ok.is_success());
        assert_eq!(ok.task_type.as_deref(), Some("qmstart"));

        let failed = TaskStatus::stopped("VM quit/powerdown failed");
        assert!(failed.is_terminal());
        assert!(!failed.is_success());
    }

    #[test]
    fn test_unknown_task_state_is_terminal() {
        let status: TaskStatus = serde_json::from_value(json!({"status": "zombie"})).unwrap();
        assert_eq!(status.state, TaskState::Unknown);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_vm_status() {
        let status: VmStatus = serde_json::from_value(json!({
            "status": "running",
            "qmpstatus": "running",
            "name": "build-01",
            "vmid": 101,
            "uptime": 42,
            "cpus": 2,
        }))
        .unwrap();
        assert!(status.is_running());
        assert_eq!(status.name.as_deref(), Some("build-01"));

        let stopped: VmStatus = serde_json::from_value(json!({"status": "stopped"})).unwrap();
        assert!(!stopped.is_running());
    }

    #[test]
    fn test_revert_policy_serde() {
        let policy: RevertPolicy = serde_json::from_value(json!("before_every_job")).unwrap();
        assert_eq!(policy, RevertPolicy::BeforeEveryJob);
        assert_eq!(RevertPolicy::default(), RevertPolicy::AfterConnect);
        assert_eq!(RevertPolicy::AfterConnect.to_string(), "after_connect");
    }

    #[test]
    fn test_task_status_display() {
        let mut status = TaskStatus::stopped("OK");
        status.upid = Some("UPID:pve1:0001".to_string());
        assert_eq!(status.to_string(), "status=stopped, exitstatus=OK, upid=UPID:pve1:0001");
    }
}
