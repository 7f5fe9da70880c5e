pub mod context;
pub mod dispatch;
pub mod handlers;
pub mod parser;

pub use context::{ActiveSessionSummary, CommandContext, SupervisorContext};
pub use dispatch::{CmdParams, CommandHandler, CommandOutcome, CommandRegistry};
pub use parser::{mention_id, parse, ParsedCommand};
