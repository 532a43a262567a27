/// Hypervisor 访问层
/// 
/// 与 Proxmox VE REST API 交互：认证会话、客户端、任务轮询

pub mod client;
pub mod session;
pub mod tasks;

#[cfg(test)]
pub mod testing;

pub use client::{HypervisorApi, PveClient};
pub use session::{Credentials, PveSession, SessionOptions};
pub use tasks::{wait_for_completion, PollOptions};
