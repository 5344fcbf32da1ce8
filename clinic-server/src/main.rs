//! 预约协调服务器主程序

mod config;

use clap::Parser;
use clinic_core::{
    AuditSink, ClinicError, Doctor, Nurse, Result, Role, Room, TracingAuditSink, User,
};
use clinic_notify::{
    ConnectionRegistry, EventListener, NotificationDeduplicator, NotificationDispatcher,
};
use clinic_scheduling::SchedulingEngine;
use clinic_store::{DatabasePool, EntityStore, MemoryStore, PostgresStore};
use clinic_web::{AppState, AuthService, WebServer};
use config::ClinicConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// 预约协调服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "clinic-server")]
#[command(about = "诊所预约协调与实时通知服务器")]
struct Args {
    /// 监听主机（覆盖配置文件）
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口（覆盖配置文件）
    #[arg(short, long)]
    port: Option<u16>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 数据库连接串（覆盖配置文件；为空时使用内存存储）
    #[arg(short, long)]
    database_url: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .init();

    info!("启动预约协调服务器...");

    let mut config = ClinicConfig::load(args.config.as_deref())
        .map_err(|e| ClinicError::Config(e.to_string()))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.database_url.is_some() {
        config.database.url = args.database_url;
    }

    let policy = config
        .scheduling
        .policy()
        .map_err(|e| ClinicError::Config(e.to_string()))?;

    info!("预约服务器配置:");
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  冲突策略: {}", policy.as_str());
    info!("  去重窗口: {}s", config.notify.dedup_window_secs);

    // 实体存储
    let store: Arc<dyn EntityStore> = match &config.database.url {
        Some(url) => {
            let pool = DatabasePool::connect(url, config.database.max_connections).await?;
            let store = PostgresStore::new(pool, policy);
            store.create_tables().await?;
            Arc::new(store)
        }
        None => {
            info!("No database configured, using in-memory store");
            Arc::new(MemoryStore::new(policy))
        }
    };

    // 调度引擎与通知链路
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let (engine, events) = SchedulingEngine::new(store.clone(), audit.clone());
    let engine = Arc::new(engine.with_retry(
        config.scheduling.max_attempts,
        Duration::from_millis(config.scheduling.retry_backoff_ms),
    ));

    let registry = ConnectionRegistry::new();
    let dedup = NotificationDeduplicator::new(
        store.clone(),
        chrono::Duration::seconds(config.notify.dedup_window_secs),
    );
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        registry.clone(),
        dedup,
        audit,
    ));

    let system_user_id = config.notify.system_user_id.unwrap_or_else(Uuid::nil);
    let _listener = EventListener::new(dispatcher.clone(), system_user_id).spawn(events);

    // 身份解析与演示目录
    let auth = Arc::new(AuthService::new());
    seed_demo_directory(&store, &auth).await?;

    let state = AppState {
        engine,
        dispatcher,
        registry,
        auth,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ClinicError::Config(format!("Invalid listen address: {}", e)))?;

    WebServer::new(addr, state).run().await
}

/// 注入演示用户与目录记录
async fn seed_demo_directory(store: &Arc<dyn EntityStore>, auth: &AuthService) -> Result<()> {
    let users = vec![
        ("admin", "System Administrator", Role::Admin),
        ("patient", "Jane Doe", Role::Patient),
        ("doctor", "Dr. Chen", Role::Doctor),
        ("nurse", "Nurse Li", Role::Nurse),
    ];

    for (username, name, role) in users {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            name: name.to_string(),
            role: role.clone(),
            is_active: true,
            created_at: chrono::Utc::now(),
        };
        store.upsert_user(user.clone()).await?;
        auth.register_user(user.clone()).await;

        match role {
            Role::Doctor => {
                store
                    .upsert_doctor(Doctor {
                        id: user.id,
                        name: user.name.clone(),
                        specialty: Some("General Medicine".to_string()),
                        created_at: user.created_at,
                    })
                    .await?;
                info!("Seeded doctor {} ({})", user.name, user.id);
            }
            Role::Nurse => {
                store
                    .upsert_nurse(Nurse {
                        id: user.id,
                        name: user.name.clone(),
                        created_at: user.created_at,
                    })
                    .await?;
                info!("Seeded nurse {} ({})", user.name, user.id);
            }
            _ => info!("Seeded user {} ({})", user.username, user.id),
        }
    }

    store
        .upsert_room(Room {
            id: Uuid::new_v4(),
            name: "Room 101".to_string(),
            location: Some("Building A".to_string()),
            created_at: chrono::Utc::now(),
        })
        .await?;

    Ok(())
}
