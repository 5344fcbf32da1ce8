//! # Clinic Store
//!
//! 实体存储适配层：为调度引擎与通知分发器提供原子读写原语，
//! 包含内存实现（测试/单机）与PostgreSQL实现（持久化部署）。

pub mod connection;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::EntityStore;
