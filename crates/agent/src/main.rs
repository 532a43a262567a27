/// PVE Agent
///
/// 把 Proxmox VE 虚拟机作为 CI Worker 使用：连接前回滚快照并启动虚拟机，断开时关机

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

mod commands;
mod config;
mod datacenter;
mod hypervisor;
mod launcher;
mod worker;

use commands::Command;

#[derive(Debug, Parser)]
#[command(name = "pve-agent", version, about = "Proxmox VE 虚拟机 CI Worker 编排")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, env = "PVE_AGENT_CONFIG", default_value = "pve-agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = config::Config::load(&cli.config)?;

    // RUST_LOG 优先，其次是配置文件中的 log_level
    tracing_subscriber::fmt()
        .with_target(false)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level)),
        )
        .init();

    info!("🚀 启动 PVE Agent...");
    info!(
        "✅ 配置加载成功: {} 个数据中心, {} 个 Worker",
        cfg.datacenters.len(),
        cfg.workers.len()
    );

    cli.command.unwrap_or(Command::Run).run(cfg).await
}
