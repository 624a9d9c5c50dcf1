//! Gateway error taxonomy.  Each variant carries a stable wire code and a
//! human-readable message in the tenant's locale; stack detail goes to the
//! logs, never to the client.

use thiserror::Error;

use lexgate_credits::CreditError;
use lexgate_instance::InstanceError;
use lexgate_llm::LlmError;
use lexgate_memory::MemoryError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("instance `{0}` not found")]
    TenantNotFound(String),
    #[error("instance invalid: {0}")]
    TenantInvalid(String),
    #[error("insufficient credits (available {available})")]
    InsufficientCredits { available: i64 },
    #[error("interaction limit reached ({current}/{max})")]
    InteractionLimitReached { current: u32, max: u32 },
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream rejected the request ({status}): {message}")]
    BadRequestUpstream { status: u16, message: String },
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable code included in the terminal error event.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::TenantNotFound(_) => "TENANT_NOT_FOUND",
            GatewayError::TenantInvalid(_) => "TENANT_INVALID",
            GatewayError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            GatewayError::InteractionLimitReached { .. } => "INTERACTION_LIMIT_REACHED",
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::BadRequestUpstream { .. } => "BAD_REQUEST_UPSTREAM",
            GatewayError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            GatewayError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            GatewayError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            GatewayError::Cancelled => "CANCELLED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to the end user.  Spanish is the deployment default;
    /// any other locale falls back to English.
    pub fn user_message(&self, locale: &str) -> String {
        let es = locale.to_lowercase().starts_with("es");
        match self {
            GatewayError::TenantNotFound(id) => {
                if es {
                    format!("El asistente `{id}` no existe.")
                } else {
                    format!("Assistant `{id}` does not exist.")
                }
            }
            GatewayError::InsufficientCredits { .. } => {
                if es {
                    "No tienes créditos disponibles para esta consulta. \
                     Contacta al administrador para recargar tu cuenta."
                        .to_string()
                } else {
                    "You have no credits available for this query. \
                     Contact your administrator to top up."
                        .to_string()
                }
            }
            GatewayError::InteractionLimitReached { max, .. } => {
                if es {
                    format!(
                        "Has alcanzado el límite máximo de interacciones ({max}) \
                         para esta conversación. Inicia una nueva para continuar."
                    )
                } else {
                    format!(
                        "You have reached the maximum number of interactions \
                         ({max}) for this chat. Start a new one to continue."
                    )
                }
            }
            GatewayError::UpstreamUnavailable(_)
            | GatewayError::BadRequestUpstream { .. } => {
                if es {
                    "El modelo no está disponible en este momento. \
                     Inténtalo de nuevo en unos segundos."
                        .to_string()
                } else {
                    "The model is unavailable right now. Please try again in a \
                     few seconds."
                        .to_string()
                }
            }
            GatewayError::PersistenceFailed(_) => {
                if es {
                    "La respuesta se generó pero no pudo guardarse. \
                     Vuelve a intentar la consulta."
                        .to_string()
                } else {
                    "The answer was generated but could not be saved. \
                     Please retry the query."
                        .to_string()
                }
            }
            GatewayError::DeadlineExceeded | GatewayError::Cancelled => {
                if es {
                    "La consulta fue cancelada o excedió el tiempo máximo.".to_string()
                } else {
                    "The query was cancelled or timed out.".to_string()
                }
            }
            other => {
                if es {
                    format!("Ocurrió un error inesperado ({}).", other.code())
                } else {
                    format!("An unexpected error occurred ({}).", other.code())
                }
            }
        }
    }
}

impl From<InstanceError> for GatewayError {
    fn from(err: InstanceError) -> Self {
        match err {
            InstanceError::NotFound(id) => GatewayError::TenantNotFound(id),
            InstanceError::Invalid { reason } => GatewayError::TenantInvalid(reason),
        }
    }
}

impl From<LlmError> for GatewayError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Unavailable(message) | LlmError::Stream(message) => {
                GatewayError::UpstreamUnavailable(message)
            }
            LlmError::BadRequest { status, message } => {
                GatewayError::BadRequestUpstream { status, message }
            }
            LlmError::DeadlineExceeded => GatewayError::DeadlineExceeded,
        }
    }
}

impl From<MemoryError> for GatewayError {
    fn from(err: MemoryError) -> Self {
        GatewayError::PersistenceFailed(err.to_string())
    }
}

impl From<CreditError> for GatewayError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::Insufficient { available, .. } => {
                GatewayError::InsufficientCredits { available }
            }
            CreditError::Store(message) => GatewayError::PersistenceFailed(message),
        }
    }
}
