pub mod cache;
pub mod events;
pub mod instance;
pub mod platform_retry;

pub use cache::Cache;
pub use instance::BotInstance;
pub use platform_retry::RetryingPlatform;
