//! Prompt-side text assembly: the dynamic context prefix injected ahead of a
//! tenant's system prompt, and the role-marked transcript serialization sent
//! to the provider.

mod context;
mod transcript;

pub use context::{build_context, ContextInputs};
pub use transcript::{serialize_input, Message, Role};
