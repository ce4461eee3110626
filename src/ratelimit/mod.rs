//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod rules;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{Identity, RateLimitKey};
pub use limiter::{Decision, RateLimiter, SweepReport, DEFAULT_GRACE_MULTIPLE};
pub use rules::{RateLimitRule, RuleConfig, RuleSet, RulesConfig, TimeUnit};
pub use store::{WindowRecord, WindowStore};
pub use sweeper::Sweeper;
