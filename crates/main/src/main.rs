//! 主应用程序入口
//!
//! 组装各层依赖并启动 Axum Web API 服务。

use std::{env, sync::Arc};

use application::{
    ChatService, ChatServiceDependencies, LocalEventBroadcaster, MemoryPresenceRegistry,
    MemorySendDeduplicator, SystemClock, UserService, UserServiceDependencies,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, BcryptPasswordHasher, PgConversationRepository, PgMessageRepository,
    PgUserRepository, MIGRATOR,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 生产环境要求显式提供关键配置，开发环境允许回落到默认值
    let config = if env::var("APP_ENV").as_deref() == Ok("production") {
        let config = AppConfig::from_env();
        config.validate()?;
        config
    } else {
        AppConfig::from_env_with_defaults()
    };

    tracing::info!(
        database = config.database.url.split('@').next_back().unwrap_or("unknown"),
        "连接数据库"
    );
    let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
    MIGRATOR.run(&pool).await?;

    let user_repository = Arc::new(PgUserRepository::new(pool.clone()));
    let conversation_repository = Arc::new(PgConversationRepository::new(pool.clone()));
    let message_repository = Arc::new(PgMessageRepository::new(pool));

    let password_hasher = Arc::new(BcryptPasswordHasher::new(config.server.bcrypt_cost));
    let clock = Arc::new(SystemClock);
    let broadcaster = Arc::new(LocalEventBroadcaster::new(config.broadcast.capacity));

    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        password_hasher,
        clock: clock.clone(),
    }));
    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        conversation_repository,
        message_repository,
        user_repository,
        clock,
        broadcaster: broadcaster.clone(),
        presence: Arc::new(MemoryPresenceRegistry::new()),
        deduplicator: Arc::new(MemorySendDeduplicator::new()),
    }));
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(user_service, chat_service, broadcaster, jwt_service);
    let app = router(state, &config.server.cors_origin);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("聊天服务器启动在 http://{bind_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
