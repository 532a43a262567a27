/// 命令行子命令
///
/// run 常驻运行全部 Worker；check/inventory/revert 用于配置时的检查和排错

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use common::models::constants::CURRENT_SNAPSHOT;
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::datacenter::DatacenterRegistry;
use crate::launcher;
use crate::worker::{self, ConsoleListener, LogListener, RevertGuard, VmLifecycle, WorkerSettings};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 连接全部 Worker，退出时关闭虚拟机
    Run,

    /// 测试数据中心连接并检查 Worker 的快照
    Check,

    /// 列出数据中心的节点、虚拟机或快照
    Inventory(InventoryArgs),

    /// 对 Worker 执行一次回滚
    Revert(RevertArgs),
}

#[derive(Debug, Args)]
pub struct InventoryArgs {
    /// 数据中心标识: `user@realm - host`
    datacenter: String,

    /// 列出该节点上的虚拟机
    #[arg(long)]
    node: Option<String>,

    /// 列出该虚拟机的快照（需要 --node）
    #[arg(long, requires = "node")]
    vm: Option<u32>,
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    /// Worker 名称
    worker: String,
}

impl Command {
    pub async fn run(self, config: Config) -> Result<()> {
        match self {
            Command::Run => run(config).await,
            Command::Check => check(config).await,
            Command::Inventory(args) => inventory(config, args).await,
            Command::Revert(args) => revert(config, args).await,
        }
    }
}

/// 收到下一次中断信号时取消所有等待
fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠️ 再次收到中断信号，取消进行中的等待");
            cancel.cancel();
        }
    });
}

async fn run(config: Config) -> Result<()> {
    let registry = Arc::new(DatacenterRegistry::new(config.datacenters.clone())?);
    info!("🔌 已注册 {} 个数据中心", registry.len());
    let cancel = CancellationToken::new();
    let workers = worker::build_all(&config, &registry, &cancel);
    if workers.is_empty() {
        warn!("⚠️ 没有配置 Worker");
    }

    info!("🚀 启动 {} 个 Worker", workers.len());
    let launches = workers.iter().map(|guard| async move {
        let name = guard.lifecycle().name().to_string();
        if let Err(e) = guard.lifecycle().launch(&LogListener::new(&name)).await {
            error!("❌ Worker {} 连接失败: {}", name, e);
        }
    });
    join_all(launches).await;

    let by_name: BTreeMap<String, Arc<RevertGuard>> = workers
        .iter()
        .map(|g| (g.lifecycle().name().to_string(), g.clone()))
        .collect();
    let events = tokio::spawn(read_events(by_name));

    tokio::signal::ctrl_c()
        .await
        .context("无法监听中断信号")?;
    info!("🛑 收到中断信号，断开全部 Worker");
    events.abort();
    watch_ctrl_c(cancel.clone());

    let disconnects = workers.iter().map(|guard| async move {
        let name = guard.lifecycle().name().to_string();
        if let Err(e) = guard.disconnect(&LogListener::new(&name)).await {
            error!("❌ Worker {} 断开失败: {}", name, e);
        }
    });
    join_all(disconnects).await;

    info!("👋 已退出");
    Ok(())
}

/// 从标准输入读取任务执行侧的事件
///
/// 每行一个事件: `task-accepted <worker>`、`reconnect <worker>` 或 `status`
async fn read_events(workers: BTreeMap<String, Arc<RevertGuard>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        let (Some(event), name) = (parts.next(), parts.next()) else {
            continue;
        };

        if event == "status" {
            for (name, guard) in &workers {
                info!(
                    "📋 {}: state={}, connected={}, reverting={}",
                    name,
                    guard.lifecycle().state().await,
                    guard.is_connected().await,
                    guard.is_reverting()
                );
            }
            continue;
        }

        let Some(guard) = name.and_then(|n| workers.get(n)).cloned() else {
            warn!("⚠️ 无法识别的事件: {}", line);
            continue;
        };

        match event {
            "task-accepted" => {
                tokio::spawn(async move {
                    let name = guard.lifecycle().name().to_string();
                    if let Err(e) = guard.on_task_accepted(&LogListener::new(&name)).await {
                        error!("❌ Worker {} 任务前回滚失败: {}", name, e);
                    }
                });
            }
            "reconnect" => {
                tokio::spawn(async move {
                    let name = guard.lifecycle().name().to_string();
                    if let Err(e) = guard.reconnect(&LogListener::new(&name)).await {
                        error!("❌ Worker {} 重连失败: {}", name, e);
                    }
                });
            }
            _ => warn!("⚠️ 未知事件: {}", event),
        }
    }
}

async fn check(config: Config) -> Result<()> {
    let registry = DatacenterRegistry::new(config.datacenters.clone())?;
    let mut failures = 0;

    for id in registry.ids() {
        let Some(client) = registry.resolve(id) else {
            failures += 1;
            println!("❌ {}: 无法创建客户端", id);
            continue;
        };
        match client.list_nodes().await {
            Ok(nodes) => println!("✅ {}: 连接成功, 节点 {:?}", id, nodes),
            Err(e) => {
                failures += 1;
                println!("❌ {}: {}", id, e);
            }
        }
    }

    for worker in &config.workers {
        if worker.snapshot == CURRENT_SNAPSHOT {
            println!("✅ {}: 使用当前状态", worker.name);
            continue;
        }

        let Some(client) = registry.resolve(&worker.datacenter) else {
            failures += 1;
            println!("❌ {}: 找不到数据中心 {}", worker.name, worker.datacenter);
            continue;
        };
        match client.list_snapshots(&worker.node, worker.vm_id).await {
            Ok(snapshots) if snapshots.contains(&worker.snapshot) => {
                println!("✅ {}: 快照 {} 存在", worker.name, worker.snapshot);
            }
            Ok(snapshots) => {
                failures += 1;
                println!(
                    "❌ {}: 虚拟机 {} 没有快照 {} (可用: {:?})",
                    worker.name, worker.vm_id, worker.snapshot, snapshots
                );
            }
            Err(e) => {
                failures += 1;
                println!("❌ {}: {}", worker.name, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} 项检查失败", failures);
    }
    Ok(())
}

async fn inventory(config: Config, args: InventoryArgs) -> Result<()> {
    let registry = DatacenterRegistry::new(config.datacenters)?;
    let client = registry
        .resolve(&args.datacenter)
        .ok_or_else(|| {
            anyhow!("找不到数据中心: {} (已配置: {:?})", args.datacenter, registry.ids())
        })?;

    match (args.node, args.vm) {
        (None, _) => {
            for node in client.list_nodes().await? {
                println!("{}", node);
            }
        }
        (Some(node), None) => {
            let vms: BTreeMap<_, _> = client.list_vms(&node).await?.into_iter().collect();
            for (name, vm_id) in vms {
                println!("{:>6}  {}", vm_id, name);
            }
        }
        (Some(node), Some(vm_id)) => {
            for snapshot in client.list_snapshots(&node, vm_id).await? {
                println!("{}", snapshot);
            }
        }
    }
    Ok(())
}

async fn revert(config: Config, args: RevertArgs) -> Result<()> {
    let worker = config
        .worker(&args.worker)
        .ok_or_else(|| anyhow!("找不到 Worker: {}", args.worker))?;

    let registry = Arc::new(DatacenterRegistry::new(config.datacenters.clone())?);
    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let (launcher, _) = launcher::build(&worker.launcher);
    let lifecycle = VmLifecycle::new(
        WorkerSettings::from_config(worker, config.poll_options()),
        registry,
        launcher,
    )
    .with_cancellation(cancel);

    lifecycle
        .revert(&ConsoleListener::new(&worker.name))
        .await
        .with_context(|| format!("Worker {} 回滚失败", worker.name))?;
    Ok(())
}
