//! # Clinic Core
//!
//! 预约协调系统的核心模块，提供基础数据结构、错误定义和审计接入。

pub mod audit;
pub mod error;
pub mod models;

pub use audit::{AuditAction, AuditRecord, AuditSink, TracingAuditSink};
pub use error::{ClinicError, Result};
pub use models::*;
