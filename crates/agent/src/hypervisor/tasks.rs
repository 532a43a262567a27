/// 任务轮询
///
/// 反复查询服务端异步任务直到结束

use std::time::Duration;

use common::models::constants::DEFAULT_POLL_INTERVAL_MS;
use common::{Error, Result, TaskHandle, TaskStatus};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::HypervisorApi;

/// 轮询参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// 两次查询之间的间隔
    pub interval: Duration,
    /// 可选的等待上限，默认不限
    pub deadline: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            deadline: None,
        }
    }
}

/// 等待任务结束并返回最终状态
///
/// 取消只影响本地等待，服务端任务会继续执行
pub async fn wait_for_completion(
    api: &dyn HypervisorApi,
    node: &str,
    task: &TaskHandle,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> Result<TaskStatus> {
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted(format!("等待任务 {} 被取消", task)));
        }

        let status = api.get_task_status(node, task).await?;
        polls += 1;
        if status.is_terminal() {
            debug!("任务结束: {} ({} 次查询, {:?})", task, polls, started.elapsed());
            return Ok(status);
        }

        if let Some(deadline) = options.deadline {
            if started.elapsed() >= deadline {
                return Err(Error::Timeout(format!(
                    "任务 {} 在 {:?} 内未结束",
                    task, deadline
                )));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Interrupted(format!("等待任务 {} 被取消", task)));
            }
            _ = tokio::time::sleep(options.interval) => {}
        }
    }
}
