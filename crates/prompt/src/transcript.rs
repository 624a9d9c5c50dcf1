//! Transcript serialization — the message sequence sent to the provider is
//! rendered into a single text blob delimited by role markers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn marker(self) -> &'static str {
        match self {
            Role::System => "[SYSTEM]",
            Role::User => "[USER]",
            Role::Assistant => "[ASSISTANT]",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Serialize `[fixed-knowledge?, system, history..., user]` into one blob.
pub fn serialize_input(
    fixed_knowledge: Option<&str>,
    system: &str,
    history: &[Message],
    user: &str,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(knowledge) = fixed_knowledge.filter(|k| !k.trim().is_empty()) {
        parts.push(format!("[KNOWLEDGE]\n{}", knowledge.trim()));
    }
    parts.push(format!("[SYSTEM]\n{system}"));
    for message in history {
        parts.push(format!("{}\n{}", message.role.marker(), message.content));
    }
    parts.push(format!("[USER]\n{user}"));

    parts.join("\n\n")
}
