/// 数据中心管理
///
/// 维护已配置的 Proxmox 端点并按标识解析客户端

pub mod registry;

pub use registry::DatacenterRegistry;
