use anyerror::AnyError;

/// Error variants related to configuration.
#[derive(Debug, thiserror::Error)]
#[derive(PartialEq, Eq)]
pub enum ConfigError {
    #[error("ParseError: {source} while parsing ({args:?})")]
    ParseError { source: AnyError, args: Vec<String> },

    #[error("heartbeat_interval({heartbeat_interval}) must be < election_timeout({election_timeout})")]
    HeartbeatNotLessThanElection {
        election_timeout: u64,
        heartbeat_interval: u64,
    },

    #[error("catchup_batch_size must be > 0")]
    CatchupBatchSizeIs0,

    #[error("resend_interval must be > 0")]
    ResendIntervalIs0,

    #[error("in-flight cache type is invalid: '{invalid}' expect: '{syntax}'")]
    InvalidInFlightCacheType { invalid: String, syntax: String },

    #[error("{reason} when parsing {invalid:?}")]
    InvalidNumber { invalid: String, reason: String },
}
