use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Startup configuration problems. Fatal, never retried.
    #[error("Config Error: {0}")]
    Config(String),

    /// Network/connectivity issues
    #[error("Network Error: {0}")]
    Network(String),

    /// RPC/Solana endpoint errors
    #[error("RPC Error: {0}")]
    Rpc(String),

    /// Quote provider errors
    #[error("Quote API Error: {0}")]
    QuoteApi(String),

    /// Quote provider rate limit exceeded
    #[error("Quote API rate limit exceeded")]
    QuoteRateLimited,

    /// Upstream payload failed validation
    #[error("Invalid Quote: {0}")]
    InvalidQuote(String),

    /// Parsing errors for wire payloads
    #[error("Parse Error: {0}")]
    Parse(String),

    /// Instruction/transaction assembly errors
    #[error("Build Error: {0}")]
    Build(String),

    /// Preflight simulation reported a failure
    #[error("Simulation Failed: {0}")]
    SimulationFailed(String),

    /// Trade execution errors
    #[error("Execution Error: {0}")]
    Execution(String),

    /// Insufficient balance for trade execution
    #[error("Insufficient Balance: {0}")]
    InsufficientBalance(String),

    /// Circuit breaker is open, new submissions refused
    #[error("Circuit breaker is open, operation blocked")]
    CircuitBreakerOpen,

    /// Daily loss ceiling crossed, submissions halted for the day
    #[error("Daily loss limit reached: {0}")]
    DailyLossLimit(String),

    /// Bounded wait elapsed
    #[error("Timeout Error: {0}")]
    Timeout(String),

    /// Durable ledger collaborator failed
    #[error("Ledger Error: {0}")]
    Ledger(String),

    /// Unknown/unclassified errors
    #[error("Unknown Error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Unknown(format!("{:#}", err))
    }
}

impl From<solana_client::client_error::ClientError> for EngineError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        EngineError::Rpc(format!("Solana client error: {}", err))
    }
}

impl EngineError {
    /// Whether a retry (possibly after endpoint failover) can help.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Config(_) => false,
            EngineError::Network(_) => true,
            EngineError::Rpc(_) => true,
            EngineError::QuoteApi(_) => true,
            EngineError::QuoteRateLimited => true,
            EngineError::InvalidQuote(_) => false,
            EngineError::Parse(_) => false,
            EngineError::Build(_) => false,
            EngineError::SimulationFailed(_) => false,
            EngineError::Execution(msg) => {
                msg.contains("slippage") || msg.contains("temporary") || msg.contains("congestion")
            }
            EngineError::InsufficientBalance(_) => false,
            EngineError::CircuitBreakerOpen => false,
            EngineError::DailyLossLimit(_) => false,
            EngineError::Timeout(_) => true,
            EngineError::Ledger(_) => true,
            EngineError::Unknown(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(!EngineError::Config("no RPC endpoint".into()).is_recoverable());
        assert!(!EngineError::CircuitBreakerOpen.is_recoverable());
    }

    #[test]
    fn transient_network_errors_are_recoverable() {
        assert!(EngineError::Network("connection reset".into()).is_recoverable());
        assert!(EngineError::Rpc("503".into()).is_recoverable());
        assert!(EngineError::QuoteRateLimited.is_recoverable());
    }

    #[test]
    fn execution_errors_depend_on_cause() {
        assert!(EngineError::Execution("slippage moved".into()).is_recoverable());
        assert!(!EngineError::Execution("signature invalid".into()).is_recoverable());
    }
}
