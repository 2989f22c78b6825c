/// 随二进制打包的数据库迁移，启动和测试共用同一份。
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
