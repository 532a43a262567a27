/// 配置管理
///
/// 从 TOML 文件加载，环境变量 `PVE_AGENT_*` 覆盖顶层配置。
/// 旧版本配置在加载时一次性迁移为当前结构。

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use common::models::constants::{
    CONFIG_VERSION, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_MS,
};
use common::{utils, Error, Result, RevertPolicy, VmIdentity};
use serde::Deserialize;
use tracing::{debug, info};
use validator::Validate;

use crate::hypervisor::{Credentials, PollOptions, SessionOptions};

const ENV_PREFIX: &str = "PVE_AGENT";

/// 数据中心（Proxmox 集群端点）配置
#[derive(Clone, Deserialize, Validate)]
pub struct DatacenterConfig {
    /// 主机名，可带端口: `pve.lan:8443`
    #[validate(length(min = 1))]
    pub hostname: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[validate(length(min = 1))]
    pub username: String,

    #[validate(length(min = 1))]
    pub realm: String,

    #[serde(default)]
    pub password: Option<String>,

    /// 保存密码的环境变量名
    #[serde(default)]
    pub password_env: Option<String>,

    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1))]
    pub http_timeout_secs: u64,
}

impl DatacenterConfig {
    /// 数据中心标识: `username@realm - hostname`
    pub fn datacenter_id(&self) -> String {
        utils::datacenter_id(&self.username, &self.realm, &self.hostname)
    }

    pub fn base_url(&self) -> String {
        utils::api_base_url(&self.hostname, self.port)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let password = match (&self.password, &self.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                Error::Config(format!("环境变量 {} 未设置 ({})", var, self.datacenter_id()))
            })?,
            (None, None) => {
                return Err(Error::Config(format!(
                    "数据中心 {} 未配置 password 或 password_env",
                    self.datacenter_id()
                )))
            }
        };
        Ok(Credentials::new(&self.username, &self.realm, password))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            verify_tls: self.verify_tls,
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            ..SessionOptions::default()
        }
    }
}

impl fmt::Debug for DatacenterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatacenterConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("password_env", &self.password_env)
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// 连接方式
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LauncherConfig {
    /// 执行命令启动 Agent 进程（如 ssh）
    Command { command: String },
    /// Agent 主动回连控制器
    Inbound,
}

/// Worker 配置
#[derive(Debug, Clone, Validate)]
pub struct WorkerConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(length(min = 1))]
    pub datacenter: String,

    #[validate(length(min = 1))]
    pub node: String,

    /// Proxmox VMID 从 100 开始
    #[validate(range(min = 100))]
    pub vm_id: u32,

    /// "current" 表示不回滚
    #[validate(length(min = 1))]
    pub snapshot: String,

    pub revert_policy: RevertPolicy,
    pub start_vm: bool,

    /// 回滚后等待客户机启动服务的秒数
    pub wait_secs: u64,

    pub launcher: LauncherConfig,
}

impl WorkerConfig {
    pub fn identity(&self) -> VmIdentity {
        VmIdentity::new(&self.datacenter, &self.node, self.vm_id)
    }

    pub fn post_action_wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

/// Agent 配置（当前版本）
#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub log_level: String,

    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    pub task_timeout_secs: Option<u64>,

    #[validate]
    pub datacenters: Vec<DatacenterConfig>,

    #[validate]
    pub workers: Vec<WorkerConfig>,
}

impl Config {
    /// 从文件加载配置，环境变量覆盖顶层字段
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("📄 加载配置文件: {}", path.display());

        let settings = config::Config::builder()
            .add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("无法读取配置 {}: {}", path.display(), e)))?;

        Self::from_settings(settings)
    }

    /// 从 TOML 文本加载配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .map_err(|e| Error::Config(format!("无法解析配置: {}", e)))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let raw: RawConfig = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("配置格式错误: {}", e)))?;

        let config = raw.migrate()?;
        config.check()?;
        debug!(
            "配置加载完成: {} 个数据中心, {} 个 Worker",
            config.datacenters.len(),
            config.workers.len()
        );
        Ok(config)
    }

    /// 字段校验与交叉引用检查
    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::Config(format!("配置校验失败: {}", e)))?;

        let mut ids = HashSet::new();
        for datacenter in &self.datacenters {
            let id = datacenter.datacenter_id();
            if datacenter.password.is_none() && datacenter.password_env.is_none() {
                return Err(Error::Config(format!("数据中心 {} 缺少密码配置", id)));
            }
            if !ids.insert(id.clone()) {
                return Err(Error::Config(format!("数据中心重复: {}", id)));
            }
        }

        let mut names = HashSet::new();
        for worker in &self.workers {
            if !names.insert(worker.name.as_str()) {
                return Err(Error::Config(format!("Worker 重复: {}", worker.name)));
            }
            if !ids.contains(&worker.datacenter) {
                return Err(Error::Config(format!(
                    "Worker {} 引用了未配置的数据中心: {}",
                    worker.name, worker.datacenter
                )));
            }
        }

        Ok(())
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(self.poll_interval_ms),
            deadline: self.task_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn worker(&self, name: &str) -> Option<&WorkerConfig> {
        self.workers.iter().find(|w| w.name == name)
    }
}

fn default_verify_tls() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// 文件中的原始配置，兼容所有版本的字段
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    version: Option<u32>,

    #[serde(default = "default_log_level")]
    log_level: String,

    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,

    #[serde(default)]
    task_timeout_secs: Option<u64>,

    #[serde(default)]
    datacenters: Vec<DatacenterConfig>,

    #[serde(default)]
    workers: Vec<RawWorker>,
}

#[derive(Debug, Deserialize)]
struct RawWorker {
    name: String,

    datacenter: Option<String>,
    node: Option<String>,
    vm_id: Option<u32>,
    snapshot: Option<String>,
    revert_policy: Option<RevertPolicy>,
    start_vm: Option<bool>,
    wait_secs: Option<u64>,
    launcher: LauncherConfig,

    // version 1 字段
    datacenter_description: Option<String>,
    datacenter_node: Option<String>,
    virtual_machine_id: Option<u32>,
    snapshot_name: Option<String>,
    wait_time_ms: Option<u64>,
    startup_waiting_period_seconds: Option<u64>,
}

impl RawConfig {
    fn migrate(self) -> Result<Config> {
        let version = self.version.unwrap_or(1);
        let workers = match version {
            1 => {
                if !self.workers.is_empty() {
                    info!("🔄 迁移 version 1 配置到 version {}", CONFIG_VERSION);
                }
                self.workers
                    .into_iter()
                    .map(RawWorker::from_v1)
                    .collect::<Result<Vec<_>>>()?
            }
            CONFIG_VERSION => self
                .workers
                .into_iter()
                .map(RawWorker::from_v2)
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(Error::Config(format!("不支持的配置版本: {}", other)));
            }
        };

        Ok(Config {
            log_level: self.log_level,
            poll_interval_ms: self.poll_interval_ms,
            task_timeout_secs: self.task_timeout_secs,
            datacenters: self.datacenters,
            workers,
        })
    }
}

fn required<T>(value: Option<T>, worker: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::Config(format!("Worker {} 缺少字段 {}", worker, field)))
}

impl RawWorker {
    fn from_v1(self) -> Result<WorkerConfig> {
        let wait_secs = match (self.wait_time_ms, self.startup_waiting_period_seconds) {
            (Some(ms), _) => ms / 1000,
            (None, Some(secs)) => secs,
            (None, None) => self.wait_secs.unwrap_or(0),
        };

        Ok(WorkerConfig {
            datacenter: required(
                self.datacenter_description.or(self.datacenter),
                &self.name,
                "datacenter_description",
            )?,
            node: required(self.datacenter_node.or(self.node), &self.name, "datacenter_node")?,
            vm_id: required(
                self.virtual_machine_id.or(self.vm_id),
                &self.name,
                "virtual_machine_id",
            )?,
            snapshot: required(
                self.snapshot_name.or(self.snapshot),
                &self.name,
                "snapshot_name",
            )?,
            revert_policy: self.revert_policy.unwrap_or_default(),
            start_vm: self.start_vm.unwrap_or(false),
            wait_secs,
            launcher: self.launcher,
            name: self.name,
        })
    }

    fn from_v2(self) -> Result<WorkerConfig> {
        Ok(WorkerConfig {
            datacenter: required(self.datacenter, &self.name, "datacenter")?,
            node: required(self.node, &self.name, "node")?,
            vm_id: required(self.vm_id, &self.name, "vm_id")?,
            snapshot: required(self.snapshot, &self.name, "snapshot")?,
            revert_policy: self.revert_policy.unwrap_or_default(),
            start_vm: self.start_vm.unwrap_or(false),
            wait_secs: self.wait_secs.unwrap_or(0),
            launcher: self.launcher,
            name: self.name,
        })
    }
}
