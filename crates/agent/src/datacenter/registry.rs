/// 数据中心注册表
///
/// 按数据中心标识查找 Hypervisor 客户端，客户端按需创建并复用

use std::collections::HashSet;
use std::sync::Arc;

use common::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::DatacenterConfig;
use crate::hypervisor::{HypervisorApi, PveClient, PveSession};

struct DatacenterEntry {
    id: String,
    /// 为空时客户端已预先注入
    config: Option<DatacenterConfig>,
    client: OnceCell<Arc<dyn HypervisorApi>>,
}

impl DatacenterEntry {
    fn client(&self) -> Result<Arc<dyn HypervisorApi>> {
        self.client
            .get_or_try_init(|| {
                let config = self.config.as_ref().ok_or_else(|| {
                    Error::Internal(format!("数据中心 {} 没有可用的配置", self.id))
                })?;
                connect(config)
            })
            .cloned()
    }
}

/// 为数据中心创建客户端，登录推迟到第一次请求
fn connect(config: &DatacenterConfig) -> Result<Arc<dyn HypervisorApi>> {
    let session = PveSession::new(
        config.base_url(),
        config.credentials()?,
        config.session_options(),
    )?;
    info!("🔌 创建 Hypervisor 客户端: {}", config.datacenter_id());
    Ok(Arc::new(PveClient::new(session)))
}

/// 数据中心注册表
///
/// 启动时构建并注入到各 Worker，不提供全局实例
pub struct DatacenterRegistry {
    entries: Vec<DatacenterEntry>,
}

impl DatacenterRegistry {
    pub fn new(configs: impl IntoIterator<Item = DatacenterConfig>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for config in configs {
            let id = config.datacenter_id();
            if !seen.insert(id.clone()) {
                return Err(Error::AlreadyExists(format!("数据中心重复: {}", id)));
            }
            debug!("注册数据中心: {}", id);
            entries.push(DatacenterEntry {
                id,
                config: Some(config),
                client: OnceCell::new(),
            });
        }

        Ok(Self { entries })
    }

    /// 使用现成的客户端构建注册表
    #[cfg(test)]
    pub fn from_clients(
        clients: impl IntoIterator<Item = (String, Arc<dyn HypervisorApi>)>,
    ) -> Self {
        let entries = clients
            .into_iter()
            .map(|(id, client)| DatacenterEntry {
                id,
                config: None,
                client: OnceCell::with_value(client),
            })
            .collect();
        Self { entries }
    }

    /// 查找数据中心的客户端
    ///
    /// 标识为空、未配置或客户端创建失败时返回 None
    pub fn resolve(&self, datacenter_id: &str) -> Option<Arc<dyn HypervisorApi>> {
        if datacenter_id.is_empty() {
            return None;
        }

        let entry = self.entries.iter().find(|e| e.id == datacenter_id)?;
        match entry.client() {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("⚠️ 无法创建数据中心 {} 的客户端: {}", datacenter_id, e);
                None
            }
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::testing::FakeHypervisor;

    fn datacenter(hostname: &str, password: Option<&str>) -> DatacenterConfig {
        DatacenterConfig {
            hostname: hostname.to_string(),
            port: None,
            username: "jenkins".to_string(),
            realm: "pve".to_string(),
            password: password.map(str::to_string),
            password_env: None,
            verify_tls: true,
            http_timeout_secs: 30,
        }
    }

    #[test]
    fn test_resolve_memoizes_client() {
        let registry = DatacenterRegistry::new(vec![
            datacenter("pve-a", Some("x")),
            datacenter("pve-b", Some("y")),
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["jenkins@pve - pve-a", "jenkins@pve - pve-b"]);

        let first = registry.resolve("jenkins@pve - pve-b").unwrap();
        let second = registry.resolve("jenkins@pve - pve-b").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = registry.resolve("jenkins@pve - pve-a").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_resolve_unknown_or_empty() {
        let registry = DatacenterRegistry::new(vec![datacenter("pve-a", Some("x"))]).unwrap();
        assert!(registry.resolve("").is_none());
        assert!(registry.resolve("jenkins@pve - pve-z").is_none());
        // 只做精确匹配
        assert!(registry.resolve("jenkins@pve - pve-").is_none());
    }

    #[test]
    fn test_duplicate_datacenter_rejected() {
        let err = DatacenterRegistry::new(vec![
            datacenter("pve-a", Some("x")),
            datacenter("pve-a", Some("y")),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_client_build_failure_resolves_none() {
        let registry = DatacenterRegistry::new(vec![datacenter("pve-a", None)]).unwrap();
        assert!(registry.resolve("jenkins@pve - pve-a").is_none());
    }

    #[tokio::test]
    async fn test_injected_clients() {
        let fake = Arc::new(FakeHypervisor::new());
        let registry = DatacenterRegistry::from_clients(vec![(
            "dc".to_string(),
            fake.clone() as Arc<dyn HypervisorApi>,
        )]);

        let client = registry.resolve("dc").unwrap();
        assert_eq!(client.list_nodes().await.unwrap(), vec!["pve1"]);
        assert_eq!(fake.count("list_nodes"), 1);
    }
}
