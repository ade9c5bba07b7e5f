//! Kaleb - Rust 业务任务自动化平台
//!
//! 用法：`kaleb [-c|--config <file>] [batch.json]`
//! 给出批处理文件时逐条处理并写出结果文件；否则对每条内置流水线跑一个示例任务并输出汇总。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kaleb::batch;
use kaleb::config::load_config;
use kaleb::core::{HealthMonitor, Orchestrator, PlatformBuilder, Task};
use kaleb::observability;
use tokio_util::sync::CancellationToken;

/// 每条内置流水线一个示例（英 / 葡混合）
const DEMO_TASKS: &[&str] = &[
    "Por favor, envie um email para o cliente com o relatório mensal",
    "Pay invoice from Amazon for $1,250.00 dated 15/03/2024",
    "Schedule a meeting to discuss the Q3 roadmap at 10:30 am with ana@acme.com",
    "Organize os documentos PDF de contratos da empresa",
    "Urgent: I cannot login to my account",
];

#[derive(Parser, Debug)]
#[command(name = "kaleb", version)]
#[command(about = "Kaleb - business task automation platform")]
struct Cli {
    /// 额外的配置文件，叠加在 config/default.toml 之上
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 批处理任务文件（JSON 数组）；省略时运行内置示例
    batch: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // 配置错误属于致命错误，直接退出
    let config = load_config(args.config.clone()).context("Failed to load configuration")?;
    observability::init(&config.logging.level);

    let orchestrator: Arc<Orchestrator> = Arc::new(
        PlatformBuilder::new(config.clone())
            .build()
            .context("Failed to build platform")?,
    );
    tracing::info!(
        pipelines = ?orchestrator.engine().pipeline_ids(),
        adapters = ?orchestrator.engine().adapters().names(),
        "platform ready"
    );

    let token = CancellationToken::new();
    let monitor = HealthMonitor::spawn(
        orchestrator.clone(),
        Duration::from_secs(config.health.interval_secs),
        token.clone(),
    );

    let work = async {
        match &args.batch {
            Some(path) => run_batch(&orchestrator, path, &config.app.output_dir).await,
            None => {
                run_demo(&orchestrator).await;
                Ok(())
            }
        }
    };

    tokio::select! {
        result = work => result?,
        _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted, shutting down"),
    }

    let status = monitor.status();
    tracing::info!(
        active_sessions = status.active_sessions,
        stored_memories = status.stored_memories,
        uptime_secs = orchestrator.uptime().as_secs(),
        "shutdown"
    );
    monitor.stop().await;
    Ok(())
}

async fn run_batch(orchestrator: &Arc<Orchestrator>, path: &Path, output_dir: &Path) -> anyhow::Result<()> {
    let items = batch::load_items(path)?;
    let outputs = orchestrator.run_batch(items).await;
    let file = batch::write_results(output_dir, &outputs)?;
    let failed = outputs.iter().filter(|o| !o.result.is_success()).count();
    tracing::info!(total = outputs.len(), failed, output = %file.display(), "batch complete");
    Ok(())
}

async fn run_demo(orchestrator: &Orchestrator) {
    let mut succeeded = 0;
    for description in DEMO_TASKS {
        let task = Task::new(*description);
        let result = orchestrator.handle(&task, None).await;
        if result.is_success() {
            succeeded += 1;
            tracing::info!(
                pipeline = %result.pipeline_id,
                duration_ms = result.duration.as_millis() as u64,
                "{description}"
            );
        } else if let Some(error) = &result.error {
            tracing::warn!(pipeline = %result.pipeline_id, kind = ?error.kind, "{description}: {}", error.message);
        }
    }
    tracing::info!(total = DEMO_TASKS.len(), succeeded, "demo complete");
}
