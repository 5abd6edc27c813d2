pub mod audit;
pub mod budget;
pub mod config;
pub mod context;
pub mod events;
pub mod prompt;
pub mod protocol;
pub mod safety;
pub mod state;
pub mod synthesis;
pub mod turn;
pub mod types;
pub mod watchdog;

pub use audit::AuditLog;
pub use budget::{BudgetExceeded, BudgetGuard};
pub use config::Config;
pub use context::TurnContext;
pub use events::AuditEvent;
pub use protocol::parse_decision;
pub use safety::{SafetyError, SafetyGate};
pub use state::TaskState;
pub use turn::{ActionKind, ActionRecord, TurnReport};
pub use types::*;
pub use watchdog::{StuckDetector, StuckVerdict};
