pub mod client;
pub mod mock;
pub mod types;

pub use client::PlatformClient;
pub use mock::MockPlatform;
pub use types::*;
