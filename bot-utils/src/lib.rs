pub mod cancel;
mod command;
pub mod rate_limiter;

pub use cancel::CancellationToken;
pub use command::{CommandParser, ParsedCommand};
pub use rate_limiter::RateLimiter;
