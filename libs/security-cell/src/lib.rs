// =====================================================================================
// SECURITY CELL - RATE LIMITING & AUDIT TRAIL
// =====================================================================================
//
// This cell provides the cross-cutting guards every mutating entry point runs
// before any side effect:
// - Sliding-window rate limiting, keyed independently by authenticated subject
//   and by client network address
// - Append-only audit logging for lifecycle events
//
// =====================================================================================

pub mod models;
pub mod services;

pub use models::{NewAuditEvent, RateLimitError, RateLimitPolicy};
pub use services::{AuditService, RateLimitService};
