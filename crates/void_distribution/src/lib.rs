//! # Void Distribution - Scene Publish/Subscribe
//!
//! Moves flushed scene changes from the participant producing a scene to
//! every renderer subscribed to it, in the same process or over a transport.
//!
//! ## Architecture
//!
//! ```text
//! +-------------+  flush   +--------------+  dispatches  +--------------------+
//! | SceneGraph  |--------->| SessionLogic |------------->| DistributionRouter |
//! | (source)    |          | per scene    |              |                    |
//! +-------------+          +--------------+              +---------+----------+
//!                                                                  |
//!                                 local: move     +----------------+-------------+
//!                                                 v                              v
//!                                         +--------------+          +---------------------+
//!                                         | RendererSink |          | packetizer + sink   |
//!                                         +--------------+          | (remote recipients) |
//!                                                                   +---------------------+
//! ```
//!
//! ## Key Components
//!
//! - [`SessionLogic`] - Decides per flush and subscriber what to send
//! - [`DistributionRouter`] - Delivers updates and handles remote messages
//! - [`SceneGraphSource`] / [`RendererSink`] / [`PacketSink`] - Collaborators
//! - [`DistributionConfig`] - Participant, packet and strategy settings
//!
//! ## Usage
//!
//! ```ignore
//! use void_distribution::{DistributionConfig, DistributionRouter};
//!
//! let mut router = DistributionRouter::new(config, store, renderer, transport)?;
//! router.create_scene(scene, "main")?;
//! router.publish(scene, PublishMode::LocalAndRemote)?;
//! router.flush(scene, &mut graph, TimeInfo::now(), None)?;
//! ```

pub mod config;
pub mod router;
pub mod session;
pub mod source;
pub mod transport;

pub use config::DistributionConfig;
pub use router::{DistributionRouter, RouterStats};
pub use session::{
    Dispatch, SessionError, SessionLogic, SessionResult, SessionState, SessionStats, StrategyKind,
    SubscriberStatus,
};
pub use source::{MemorySceneSource, PacketSink, RendererSink, SceneGraphSource, SceneSnapshot};
pub use transport::{ChannelNetwork, ChannelTransport, Envelope};

use thiserror::Error;
use void_ir::SceneId;
use void_protocol::CodecError;

/// Distribution errors
#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("Scene not found: {0}")]
    SceneNotFound(SceneId),

    #[error("Scene already exists: {0}")]
    SceneExists(SceneId),

    #[error("Remote publishing is disabled")]
    RemoteNotAllowed,

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for distribution operations
pub type DistributionResult<T> = Result<T, DistributionError>;
