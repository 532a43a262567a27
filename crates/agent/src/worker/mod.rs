/// Worker 生命周期
///
/// 连接/断开时的虚拟机编排、任务触发的回滚以及监听器输出

pub mod guard;
pub mod lifecycle;
pub mod listener;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::datacenter::DatacenterRegistry;
use crate::launcher;

pub use guard::RevertGuard;
pub use lifecycle::{VmLifecycle, WorkerSettings};
pub use listener::{ConsoleListener, LogListener};

/// 按配置创建全部 Worker
pub fn build_all(
    config: &Config,
    registry: &Arc<DatacenterRegistry>,
    cancel: &CancellationToken,
) -> Vec<Arc<RevertGuard>> {
    let poll = config.poll_options();
    config
        .workers
        .iter()
        .map(|worker| {
            let (launcher, channel) = launcher::build(&worker.launcher);
            let lifecycle = VmLifecycle::new(
                WorkerSettings::from_config(worker, poll),
                registry.clone(),
                launcher,
            )
            .with_cancellation(cancel.child_token());
            Arc::new(RevertGuard::new(Arc::new(lifecycle), channel))
        })
        .collect()
}
