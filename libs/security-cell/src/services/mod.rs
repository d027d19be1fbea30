pub mod audit;
pub mod rate_limit;

pub use audit::AuditService;
pub use rate_limit::RateLimitService;
