//! Raft runtime configuration.

use std::time::Duration;

use anyerror::AnyError;
use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::config::error::ConfigError;

/// Which in-flight cache a member keeps in front of its log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InFlightCacheType {
    /// Consecutive entries, bounded by entry count and bytes.
    Consecutive,
    Unbounded,
    /// No caching. Shippers always read the log.
    None,
}

fn parse_in_flight_cache_type(src: &str) -> Result<InFlightCacheType, ConfigError> {
    match src {
        "consecutive" => Ok(InFlightCacheType::Consecutive),
        "unbounded" => Ok(InFlightCacheType::Unbounded),
        "none" => Ok(InFlightCacheType::None),
        _ => Err(ConfigError::InvalidInFlightCacheType {
            invalid: src.to_string(),
            syntax: "consecutive|unbounded|none".to_string(),
        }),
    }
}

/// Parse number with unit such as 5.3 KB
fn parse_bytes_with_unit(src: &str) -> Result<u64, ConfigError> {
    let res = byte_unit::Byte::from_str(src).map_err(|e| ConfigError::InvalidNumber {
        invalid: src.to_string(),
        reason: e.to_string(),
    })?;

    Ok(res.get_bytes() as u64)
}

/// The runtime configuration of a raft member.
///
/// All durations are in milliseconds. Keep `heartbeat_interval` well below `election_timeout`:
/// a follower that misses heartbeats for a whole election timeout starts an election.
#[derive(Clone, Debug, Serialize, Deserialize, Parser)]
pub struct Config {
    /// The application specific name of this raft cluster
    #[clap(long, env = "RAFT_CLUSTER_NAME", default_value = "causal")]
    pub cluster_name: String,

    /// The base election timeout. Each election timer is randomized in `[t, 2t)`.
    #[clap(long, env = "RAFT_ELECTION_TIMEOUT", default_value = "500")]
    pub election_timeout: u64,

    /// The interval at which a leader sends heartbeats to followers
    #[clap(long, env = "RAFT_HEARTBEAT_INTERVAL", default_value = "150")]
    pub heartbeat_interval: u64,

    /// No quorum is ever claimed while the cluster has fewer voting members than this
    #[clap(long, env = "RAFT_MIN_QUORUM_SIZE", default_value = "0")]
    pub min_quorum_size: u64,

    /// The maximum number of entries a log shipper sends in one request
    #[clap(long, env = "RAFT_CATCHUP_BATCH_SIZE", default_value = "64")]
    pub catchup_batch_size: u64,

    /// A follower lagging more than this many entries gets catch-up batches instead of
    /// individual new entries
    #[clap(long, env = "RAFT_MAX_ALLOWED_SHIPPING_LAG", default_value = "256")]
    pub max_allowed_shipping_lag: u64,

    /// How long a follower may fail to make catch-up progress before it is reported degraded,
    /// and how long a joining member may take to catch up
    #[clap(long, env = "RAFT_CATCHUP_TIMEOUT", default_value = "10000")]
    pub catchup_timeout: u64,

    /// How often a log shipper resends an unacknowledged request
    #[clap(long, env = "RAFT_RESEND_INTERVAL", default_value = "250")]
    pub resend_interval: u64,

    /// consecutive, unbounded or none
    #[clap(
        long,
        env = "RAFT_IN_FLIGHT_CACHE_TYPE",
        default_value = "consecutive",
        parse(try_from_str=parse_in_flight_cache_type)
    )]
    pub in_flight_cache_type: InFlightCacheType,

    /// The maximum number of entries in the in-flight cache
    #[clap(long, env = "RAFT_IN_FLIGHT_CACHE_MAX_ENTRIES", default_value = "1024")]
    pub in_flight_cache_max_entries: u64,

    /// The maximum total size of entries in the in-flight cache
    #[clap(
        long,
        env = "RAFT_IN_FLIGHT_CACHE_MAX_BYTES",
        default_value = "8MiB",
        parse(try_from_str=parse_bytes_with_unit)
    )]
    pub in_flight_cache_max_bytes: u64,

    /// Ask peers whether an election could be won before starting one
    #[clap(long, env = "RAFT_ENABLE_PRE_VOTING")]
    pub enable_pre_voting: bool,

    /// Never start an election. The member still votes and replicates.
    #[clap(long, env = "RAFT_REFUSE_TO_BE_LEADER")]
    pub refuse_to_be_leader: bool,
}

impl Default for Config {
    fn default() -> Self {
        <Self as Parser>::parse_from(&Vec::<&'static str>::new())
    }
}

impl Config {
    /// Generate a new random election timeout in `[election_timeout, 2 * election_timeout)`.
    pub fn new_rand_election_timeout(&self) -> Duration {
        let ms = rand::rng().random_range(self.election_timeout..self.election_timeout * 2);
        Duration::from_millis(ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval)
    }

    pub fn catchup_timeout(&self) -> Duration {
        Duration::from_millis(self.catchup_timeout)
    }

    pub fn build(args: &[&str]) -> Result<Config, ConfigError> {
        let config = <Self as Parser>::try_parse_from(args).map_err(|e| ConfigError::ParseError {
            source: AnyError::new(&e),
            args: args.iter().map(|x| x.to_string()).collect(),
        })?;
        config.validate()
    }

    /// Validate the state of this config.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.heartbeat_interval >= self.election_timeout {
            return Err(ConfigError::HeartbeatNotLessThanElection {
                election_timeout: self.election_timeout,
                heartbeat_interval: self.heartbeat_interval,
            });
        }

        if self.catchup_batch_size == 0 {
            return Err(ConfigError::CatchupBatchSizeIs0);
        }

        if self.resend_interval == 0 {
            return Err(ConfigError::ResendIntervalIs0);
        }

        Ok(self)
    }
}
