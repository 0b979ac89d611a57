//! Scene and participant addressing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a scene, unique across all participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SceneId(u64);

impl SceneId {
    /// Create a scene ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

/// Identifier of a participant (client or renderer process)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Create a participant ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

/// Who may see a published scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishMode {
    /// Only renderers in the same process
    LocalOnly,
    /// Local renderers and remote participants
    LocalAndRemote,
}

impl PublishMode {
    /// Check if remote participants may subscribe
    pub fn allows_remote(&self) -> bool {
        matches!(self, Self::LocalAndRemote)
    }
}

/// Announcement of an available scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneInfo {
    /// Scene identifier
    pub id: SceneId,
    /// Human-readable name
    pub name: String,
    /// Participant producing the scene
    pub provider: ParticipantId,
    /// Publication mode
    pub mode: PublishMode,
}

impl SceneInfo {
    /// Create scene info
    pub fn new(id: SceneId, name: impl Into<String>, provider: ParticipantId, mode: PublishMode) -> Self {
        Self {
            id,
            name: name.into(),
            provider,
            mode,
        }
    }
}
