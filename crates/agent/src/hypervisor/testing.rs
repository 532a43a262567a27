/// 测试用 Hypervisor
///
/// 记录调用序列，模拟任务轮询和失败注入

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use common::{Error, Result, TaskHandle, TaskStatus, VmPowerState, VmStatus};

use super::client::HypervisorApi;

type ErrorFactory = fn(String) -> Error;

pub struct FakeHypervisor {
    calls: Mutex<Vec<String>>,
    running: AtomicBool,
    pending_polls: AtomicU32,
    shutdown_exit: Mutex<String>,
    snapshots: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, ErrorFactory>>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            pending_polls: AtomicU32::new(0),
            shutdown_exit: Mutex::new("OK".to_string()),
            snapshots: Mutex::new(vec!["clean".to_string(), "current".to_string()]),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// 之后的任务查询先返回多少次 running
    pub fn set_pending_polls(&self, polls: u32) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_shutdown_exit(&self, exit: &str) {
        *self.shutdown_exit.lock().unwrap() = exit.to_string();
    }

    /// 让某个操作返回错误: rollback/start/stop/shutdown/is_running/wait/...
    pub fn fail(&self, operation: &'static str, make: ErrorFactory) {
        self.failures.lock().unwrap().insert(operation, make);
    }

    /// 把外部事件插入调用序列，便于检查先后顺序
    pub fn note(&self, event: impl Into<String>) {
        self.calls.lock().unwrap().push(event.into());
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, operation: &'static str, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(operation) {
            Some(make) => Err(make(format!("{} 注入失败", operation))),
            None => Ok(()),
        }
    }

    fn task(node: &str, action: &str, vm_id: u32) -> TaskHandle {
        TaskHandle::new(format!("UPID:{}:{}:{}", node, action, vm_id))
    }
}

#[async_trait]
impl HypervisorApi for FakeHypervisor {
    async fn list_nodes(&self) -> Result<Vec<String>> {
        self.record("list_nodes", "list_nodes".to_string())?;
        Ok(vec!["pve1".to_string()])
    }

    async fn list_vms(&self, node: &str) -> Result<HashMap<String, u32>> {
        self.record("list_vms", format!("list_vms({})", node))?;
        Ok(HashMap::from([("build".to_string(), 101)]))
    }

    async fn get_vm_status(&self, node: &str, vm_id: u32) -> Result<VmStatus> {
        self.record("get_vm_status", format!("get_vm_status({},{})", node, vm_id))?;
        let status = if self.running.load(Ordering::SeqCst) {
            VmPowerState::Running
        } else {
            VmPowerState::Stopped
        };
        Ok(VmStatus {
            status,
            name: Some("build".to_string()),
            vmid: Some(vm_id),
            qmpstatus: None,
            uptime: None,
        })
    }

    async fn is_running(&self, node: &str, vm_id: u32) -> Result<bool> {
        self.record("is_running", format!("is_running({},{})", node, vm_id))?;
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn list_snapshots(&self, node: &str, vm_id: u32) -> Result<Vec<String>> {
        self.record("list_snapshots", format!("list_snapshots({},{})", node, vm_id))?;
        Ok(self.snapshots.lock().unwrap().clone())
    }

    async fn rollback_snapshot(&self, node: &str, vm_id: u32, snapshot: &str) -> Result<TaskHandle> {
        self.record("rollback", format!("rollback({},{},{})", node, vm_id, snapshot))?;
        // 不含内存的快照回滚后虚拟机处于关机状态
        self.running.store(false, Ordering::SeqCst);
        Ok(Self::task(node, "rollback", vm_id))
    }

    async fn start_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle> {
        self.record("start", format!("start({},{})", node, vm_id))?;
        self.running.store(true, Ordering::SeqCst);
        Ok(Self::task(node, "start", vm_id))
    }

    async fn stop_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle> {
        self.record("stop", format!("stop({},{})", node, vm_id))?;
        self.running.store(false, Ordering::SeqCst);
        Ok(Self::task(node, "stop", vm_id))
    }

    async fn shutdown_vm(&self, node: &str, vm_id: u32) -> Result<TaskHandle> {
        self.record("shutdown", format!("shutdown({},{})", node, vm_id))?;
        Ok(Self::task(node, "shutdown", vm_id))
    }

    async fn get_task_status(&self, _node: &str, task: &TaskHandle) -> Result<TaskStatus> {
        let action = task.as_str().split(':').nth(2).unwrap_or("unknown").to_string();
        self.record("wait", format!("wait({})", action))?;

        let pending = self.pending_polls.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_polls.store(pending - 1, Ordering::SeqCst);
            return Ok(TaskStatus::running());
        }

        if action == "shutdown" {
            let exit = self.shutdown_exit.lock().unwrap().clone();
            if exit == "OK" {
                self.running.store(false, Ordering::SeqCst);
            }
            return Ok(TaskStatus::stopped(exit));
        }
        Ok(TaskStatus::stopped("OK"))
    }
}
