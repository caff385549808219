//! pushctl - Push Inbox 本地诊断工具
//!
//! 在文件存储上直接操作通知收件箱：模拟推送、查看列表、同步离线队列、管理角标。

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use push_inbox::platform::headless::{
    LogNavigator, LogPresenter, ManualPushProvider, StaticPermission, StaticProbe,
};
use push_inbox::{
    DeliveryContext, EngineBuilder, EngineConfig, FileKvStore, IngestOutcome, LifecycleCoordinator,
    OpenedEvent, RawPayload,
};

#[derive(Parser)]
#[command(name = "pushctl")]
#[command(about = "Push Inbox - 设备端推送通知收件箱诊断工具")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/push-inbox/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// 数据目录（覆盖配置文件）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// 模拟断网
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 模拟收到一条推送
    Ingest {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        /// 自定义数据 key=value，可重复
        #[arg(long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,
        /// 推送服务消息 ID
        #[arg(long)]
        message_id: Option<String>,
        /// 按后台投递处理
        #[arg(long)]
        background: bool,
    },
    /// 列出通知（最新在前）
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 只显示未读
        #[arg(long)]
        unread: bool,
    },
    /// 同步离线队列
    Drain,
    /// 标记已读
    MarkRead { id: String },
    /// 全部标记已读并清零角标
    MarkAllRead,
    /// 模拟点击通知
    Open { id: String },
    /// 角标操作
    Badge {
        #[command(subcommand)]
        action: BadgeAction,
    },
    /// 查看收件箱状态
    Status {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BadgeAction {
    Get,
    Set { count: u64 },
    Clear,
}

fn parse_data(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => bail!("invalid --data '{}', expected KEY=VALUE", pair),
        })
        .collect()
}

fn build_engine(cli: &Cli) -> Result<Arc<LifecycleCoordinator>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::auto_load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    let kv = Arc::new(FileKvStore::open(config.storage_dir())?);
    EngineBuilder::new()
        .config(config)
        .storage(kv)
        .presenter(Arc::new(LogPresenter::new()))
        .connectivity(Arc::new(StaticProbe::new(!cli.offline)))
        .permission(Arc::new(StaticPermission::granted()))
        .push_provider(Arc::new(ManualPushProvider::with_token("pushctl-local")))
        .navigator(Arc::new(LogNavigator::new()))
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("push_inbox=info,pushctl=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let engine = build_engine(&cli)?;

    match &cli.command {
        Commands::Ingest {
            title,
            body,
            data,
            message_id,
            background,
        } => {
            engine.startup().await;

            let mut payload = RawPayload::data_only();
            if title.is_some() || body.is_some() {
                payload.notification = Some(push_inbox::RawAlert {
                    title: title.clone(),
                    body: body.clone(),
                });
            }
            for (k, v) in parse_data(data)? {
                payload = payload.with_data(k, v);
            }
            if let Some(id) = message_id {
                payload = payload.with_message_id(id.clone());
            }

            let context = if *background {
                DeliveryContext::Background
            } else {
                DeliveryContext::Foreground
            };
            match engine.ingest(&payload, context).await? {
                IngestOutcome::Stored(n) => println!("已写入: {}", n.id),
                IngestOutcome::Queued(n) => println!("离线暂存: {}", n.id),
                IngestOutcome::Dropped(reason) => println!("已丢弃: {}", reason),
                IngestOutcome::Duplicate { message_id } => println!("重复投递: {}", message_id),
            }
        }
        Commands::List { json, unread } => {
            let notifications: Vec<_> = engine
                .notifications()
                .await?
                .into_iter()
                .filter(|n| !*unread || !n.is_read())
                .collect();

            if *json {
                println!("{}", serde_json::to_string_pretty(&notifications)?);
            } else {
                println!("共 {} 条通知:\n", notifications.len());
                for n in notifications {
                    let marker = if n.is_read() { " " } else { "●" };
                    println!(
                        "  {} {} | {} | {} | {}",
                        marker,
                        n.id,
                        n.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        n.title,
                        n.body
                    );
                }
            }
        }
        Commands::Drain => {
            let report = engine.startup().await;
            if !report.reachable {
                println!("当前离线，未同步");
            } else if let Some(error) = &report.drain_error {
                bail!("同步失败: {}", error);
            } else {
                // 启动时已同步过一次，这里再执行一次以报告最新结果
                let outcome = engine.drain().await?;
                let drained = report.drain.map(|d| d.drained()).unwrap_or(0) + outcome.drained();
                println!("已同步 {} 条", drained);
            }
        }
        Commands::MarkRead { id } => {
            if engine.mark_read(id).await? {
                println!("已标记已读: {}", id);
            } else {
                println!("未找到未读通知: {}", id);
            }
        }
        Commands::MarkAllRead => {
            let count = engine.mark_all_read().await?;
            println!("已标记 {} 条为已读，角标已清零", count);
        }
        Commands::Open { id } => {
            let link = engine
                .on_notification_opened(OpenedEvent {
                    notification_id: Some(id.clone()),
                    ..OpenedEvent::default()
                })
                .await?;
            println!("打开: {} ({})", link.notification_id, link.kind);
        }
        Commands::Badge { action } => match action {
            BadgeAction::Get => println!("{}", engine.badge().get().await?),
            BadgeAction::Set { count } => {
                engine.badge().set(*count).await?;
                println!("角标已设置为 {}", count);
            }
            BadgeAction::Clear => {
                engine.badge().clear().await?;
                println!("角标已清零");
            }
        },
        Commands::Status { json } => {
            let status = serde_json::json!({
                "notifications": engine.store().len().await?,
                "unread": engine.store().unread_count().await?,
                "capacity": engine.store().capacity(),
                "queued": engine.queue().len().await?,
                "badge": engine.badge().get().await?,
                "last_sync": engine.drainer().last_sync().await?,
                "token": engine.stored_token().await?,
            });

            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("收件箱状态:");
                println!("  通知: {} / {}", status["notifications"], status["capacity"]);
                println!("  未读: {}", status["unread"]);
                println!("  离线队列: {}", status["queued"]);
                println!("  角标: {}", status["badge"]);
                println!("  最后同步: {}", status["last_sync"]);
            }
        }
    }

    engine.shutdown();
    Ok(())
}
