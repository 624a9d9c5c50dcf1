//! Turn execution runtime: the orchestrator that takes one user question to
//! a streamed answer plus its side effects (memory, counters, credits,
//! cache, normative annex), the client event protocol, and the gateway
//! error taxonomy.

mod error;
mod events;
mod gate;
mod orchestrator;

pub use error::GatewayError;
pub use events::{to_sse, CachedTurn, CreditSummary, TurnEvent, SSE_DONE};
pub use gate::TurnGate;
pub use orchestrator::{Attachment, TurnModel, TurnOrchestrator, TurnRequest};
