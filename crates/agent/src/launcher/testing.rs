/// 测试用连接方式
///
/// 把 launch/disconnect 记录到 FakeHypervisor 的调用序列中

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{Error, Result};

use super::{Launcher, LauncherKind, WorkerChannel};
use crate::hypervisor::testing::FakeHypervisor;
use crate::worker::listener::TaskListener;

pub struct FakeLauncher {
    api: Arc<FakeHypervisor>,
    kind: LauncherKind,
    launches: AtomicU32,
    connected: AtomicBool,
    launch_delay: Mutex<Duration>,
    fail_disconnect: AtomicBool,
    fail_launch: AtomicBool,
}

impl FakeLauncher {
    pub fn new(api: Arc<FakeHypervisor>, kind: LauncherKind) -> Self {
        Self {
            api,
            kind,
            launches: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            launch_delay: Mutex::new(Duration::ZERO),
            fail_disconnect: AtomicBool::new(false),
            fail_launch: AtomicBool::new(false),
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// 下一次 launch 延迟完成，完成时才记录
    pub fn delay_next_launch(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = delay;
    }

    pub fn fail_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn fail_launch(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    fn kind(&self) -> LauncherKind {
        self.kind
    }

    fn is_launch_supported(&self) -> bool {
        self.kind == LauncherKind::Command
    }

    async fn launch(&self, _worker: &str, _listener: &dyn TaskListener) -> Result<()> {
        let delay = std::mem::take(&mut *self.launch_delay.lock().unwrap());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.api.note("launch");
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(Error::Internal("launch 注入失败".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl WorkerChannel for FakeLauncher {
    async fn disconnect(&self, _worker: &str, _listener: &dyn TaskListener) -> Result<()> {
        self.api.note("disconnect");
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(Error::Internal("disconnect 注入失败".to_string()));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
