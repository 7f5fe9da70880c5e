pub mod context;
pub mod initiator;
pub mod session;

pub use context::MirrorContext;
pub use initiator::Initiator;
pub use session::{Session, Side};
