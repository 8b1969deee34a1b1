//! The consensus core of causal clustering: a raft replicated log with a single leader per term,
//! durable term and vote, an in-flight cache of recent entries, one log shipper per follower
//! and one-member-at-a-time membership change.
//!
//! The decisions are made by a pure machine, [`machine::handle`], which maps the current state
//! and one message to an [`machine::Outcome`]. A [`Raft`] member runs that machine on a single
//! task and carries out every outcome.

pub mod config;
mod core;
pub mod entry;
pub mod error;
pub mod log;
pub mod machine;
pub mod marshal;
mod membership;
pub mod messages;
pub mod metrics;
pub mod monitoring;
pub mod network;
pub mod quorum;
pub mod raft;
mod raft_types;
pub mod shipping;
pub mod state;
mod timer;

pub use async_trait;

pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::entry::AppData;
pub use crate::entry::MemberSet;
pub use crate::entry::RaftLogEntry;
pub use crate::entry::ReplicatedContent;
pub use crate::error::BootstrapError;
pub use crate::error::ClientWriteError;
pub use crate::error::NoLeaderFoundError;
pub use crate::error::RaftError;
pub use crate::metrics::RaftMetrics;
pub use crate::metrics::ServerState;
pub use crate::network::Inbound;
pub use crate::network::InboundHandler;
pub use crate::network::Outbound;
pub use crate::raft::Raft;
pub use crate::raft_types::LogIndex;
pub use crate::raft_types::LogPosition;
pub use crate::raft_types::MemberId;
pub use crate::raft_types::MessageSummary;
pub use crate::raft_types::Term;
pub use crate::raft_types::NO_INDEX;
