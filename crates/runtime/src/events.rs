//! Client-facing turn events and their server-sent-event rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lexgate_config::TokenUsage;
use lexgate_credits::CreditDebit;
use lexgate_memory::InteractionStatus;
use lexgate_textproc::UrlValidation;

/// Credit accounting surfaced in the terminal event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CreditSummary {
    pub credits: i64,
    pub cost_usd: f64,
}

impl CreditSummary {
    pub fn zero() -> Self {
        Self { credits: 0, cost_usd: 0.0 }
    }
}

impl From<&CreditDebit> for CreditSummary {
    fn from(debit: &CreditDebit) -> Self {
        Self { credits: debit.credits, cost_usd: debit.cost_usd }
    }
}

/// One event of a turn's stream, in wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnEvent {
    Delta {
        content: String,
    },
    Status {
        message: String,
    },
    Done {
        usage: TokenUsage,
        #[serde(rename = "interactionStatus")]
        interaction_status: InteractionStatus,
        #[serde(rename = "creditConsumption")]
        credit_consumption: CreditSummary,
        #[serde(rename = "normativeAnnex", default)]
        normative_annex: Vec<Value>,
        #[serde(
            rename = "urlValidation",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        url_validation: Option<UrlValidation>,
        #[serde(rename = "fromCache", default)]
        from_cache: bool,
    },
    Error {
        message: String,
        code: String,
    },
}

/// A completed turn as stored in the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTurn {
    pub text: String,
    pub usage: TokenUsage,
    #[serde(rename = "interactionStatus")]
    pub interaction_status: InteractionStatus,
    #[serde(rename = "normativeAnnex", default)]
    pub normative_annex: Vec<Value>,
}

/// Render one event as an SSE frame.
pub fn to_sse(event: &TurnEvent) -> String {
    let json = serde_json::to_string(event).expect("turn event serialization");
    format!("data: {json}\n\n")
}

/// Frame sent after the terminal event.
pub const SSE_DONE: &str = "data: [DONE]\n\n";
