// ==========================================
// 营销活动事件调度 - 单次调度入口
// ==========================================
// 用法:
//   run-scheduling-pass [--thread=<id>] [db_path] <campaign_id>
//
// 读取 config_kv 中的调度配置，对活动执行一次调度过程，
// 以 JSON 输出 PassReport。数据库路径缺省时取
// CAMPAIGN_SCHEDULER_DB_PATH 或用户数据目录。
// scheduler_max_threads > 1 时，每个进程用 --thread 指定自己的分片（缺省 1）。
// ==========================================

use anyhow::{bail, Context};
use campaign_event_scheduler::config::{get_default_db_path, ConfigManager, SchedulerConfigReader};
use campaign_event_scheduler::db::{init_schema, open_sqlite_connection};
use campaign_event_scheduler::engine::SchedulingPass;
use campaign_event_scheduler::logging;
use campaign_event_scheduler::repository::EventLogRepository;
use chrono::Utc;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let CliArgs {
        db_path,
        campaign_id,
        thread_id,
    } = parse_args(&args)?;

    tracing::info!(
        version = campaign_event_scheduler::VERSION,
        %db_path,
        campaign_id,
        thread_id,
        "启动调度过程"
    );

    let conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    init_schema(&conn).context("初始化表结构失败")?;
    let conn = Arc::new(Mutex::new(conn));

    let config = ConfigManager::from_connection(conn.clone())
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .load_scheduler_config()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("读取调度配置失败")?;
    tracing::debug!(?config, "调度配置");

    let mut limiter = config.limiter_for_thread(thread_id)?;
    let pass = SchedulingPass::new(EventLogRepository::new(conn));
    let report = pass.run(campaign_id, Utc::now().naive_utc(), &mut limiter)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

const USAGE: &str = "用法: run-scheduling-pass [--thread=<id>] [db_path] <campaign_id>";

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    db_path: String,
    campaign_id: i64,
    thread_id: u32,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut thread_id = 1;
    let mut positional = Vec::new();
    for arg in args {
        match arg.strip_prefix("--thread=") {
            Some(raw) => {
                thread_id = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("thread 不是正整数: {}", raw))?;
            }
            None => positional.push(arg.as_str()),
        }
    }

    let (db_path, campaign_arg) = match positional.as_slice() {
        [campaign_id] => (get_default_db_path(), *campaign_id),
        [db_path, campaign_id] => (db_path.to_string(), *campaign_id),
        _ => bail!(USAGE),
    };
    let campaign_id = campaign_arg
        .trim()
        .parse()
        .with_context(|| format!("campaign_id 不是整数: {}", campaign_arg))?;

    Ok(CliArgs {
        db_path,
        campaign_id,
        thread_id,
    })
}
