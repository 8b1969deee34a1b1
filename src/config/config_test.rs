use std::time::Duration;

use crate::config::error::ConfigError;
use crate::config::Config;
use crate::config::InFlightCacheType;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!("causal", cfg.cluster_name);
    assert_eq!(500, cfg.election_timeout);
    assert_eq!(150, cfg.heartbeat_interval);
    assert_eq!(0, cfg.min_quorum_size);
    assert_eq!(64, cfg.catchup_batch_size);
    assert_eq!(256, cfg.max_allowed_shipping_lag);
    assert_eq!(InFlightCacheType::Consecutive, cfg.in_flight_cache_type);
    assert_eq!(8 * 1024 * 1024, cfg.in_flight_cache_max_bytes);
    assert!(!cfg.enable_pre_voting);
    assert!(!cfg.refuse_to_be_leader);
}

#[test]
fn test_rand_election_timeout_range() {
    let cfg = Config::default();

    for _ in 0..100 {
        let t = cfg.new_rand_election_timeout();
        assert!(t >= Duration::from_millis(500));
        assert!(t < Duration::from_millis(1000));
    }
}

#[test]
fn test_invalid_config_produces_expected_error() {
    let config = Config {
        election_timeout: 100,
        heartbeat_interval: 100,
        ..Default::default()
    };

    let err = config.validate().unwrap_err();
    assert_eq!(err, ConfigError::HeartbeatNotLessThanElection {
        election_timeout: 100,
        heartbeat_interval: 100
    });

    let config = Config {
        catchup_batch_size: 0,
        ..Default::default()
    };
    assert_eq!(ConfigError::CatchupBatchSizeIs0, config.validate().unwrap_err());
}

#[test]
fn test_build() -> anyhow::Result<()> {
    let config = Config::build(&[
        "foo",
        "--cluster-name=bar",
        "--election-timeout=300",
        "--heartbeat-interval=50",
        "--min-quorum-size=2",
        "--catchup-batch-size=10",
        "--max-allowed-shipping-lag=20",
        "--catchup-timeout=1000",
        "--resend-interval=30",
        "--in-flight-cache-type=unbounded",
        "--in-flight-cache-max-entries=7",
        "--in-flight-cache-max-bytes=1KiB",
        "--enable-pre-voting",
        "--refuse-to-be-leader",
    ])?;

    assert_eq!("bar", config.cluster_name);
    assert_eq!(300, config.election_timeout);
    assert_eq!(50, config.heartbeat_interval);
    assert_eq!(2, config.min_quorum_size);
    assert_eq!(10, config.catchup_batch_size);
    assert_eq!(20, config.max_allowed_shipping_lag);
    assert_eq!(Duration::from_millis(1000), config.catchup_timeout());
    assert_eq!(Duration::from_millis(30), config.resend_interval());
    assert_eq!(InFlightCacheType::Unbounded, config.in_flight_cache_type);
    assert_eq!(7, config.in_flight_cache_max_entries);
    assert_eq!(1024, config.in_flight_cache_max_bytes);
    assert!(config.enable_pre_voting);
    assert!(config.refuse_to_be_leader);

    tracing::info!("--- invalid cache type");
    let res = Config::build(&["foo", "--in-flight-cache-type=lru"]);
    assert!(matches!(res, Err(ConfigError::ParseError { .. })));

    Ok(())
}
