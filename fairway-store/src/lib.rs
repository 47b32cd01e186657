pub mod app_config;
pub mod catalog;
pub mod inventory;
pub mod memory;
pub mod rate_limit;
pub mod redis_repo;

pub use catalog::InMemoryAddOnCatalog;
pub use inventory::InMemoryInventory;
pub use memory::{
    InMemoryAuditRepository, InMemoryBookingRepository, InMemoryCourseRulesRepository,
    InMemoryIdempotencyStore, InMemoryPaymentRepository,
};
pub use rate_limit::InMemoryRateLimiter;
pub use redis_repo::RedisRateLimiter;
