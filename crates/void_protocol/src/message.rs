//! Distribution messages exchanged between participants

use crate::CodecResult;
use serde::{Deserialize, Serialize};
use void_ir::{ParticipantId, SceneId, SceneInfo};

/// Commands carried over a participant connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionMessage {
    /// A provider published a scene
    SceneAvailable(SceneInfo),
    /// A provider withdrew a scene
    SceneUnavailable {
        scene: SceneId,
        provider: ParticipantId,
    },
    /// A participant wants updates of a scene
    Subscribe {
        scene: SceneId,
        subscriber: ParticipantId,
    },
    /// A participant no longer wants updates of a scene
    Unsubscribe {
        scene: SceneId,
        subscriber: ParticipantId,
    },
    /// One packet of a scene update
    UpdatePacket { scene: SceneId, packet: Vec<u8> },
}

impl DistributionMessage {
    /// Scene the message refers to
    pub fn scene(&self) -> SceneId {
        match self {
            Self::SceneAvailable(info) => info.id,
            Self::SceneUnavailable { scene, .. }
            | Self::Subscribe { scene, .. }
            | Self::Unsubscribe { scene, .. }
            | Self::UpdatePacket { scene, .. } => *scene,
        }
    }

    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::SceneAvailable(_) => "SceneAvailable",
            Self::SceneUnavailable { .. } => "SceneUnavailable",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::UpdatePacket { .. } => "UpdatePacket",
        }
    }

    /// Serialize to bytes
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
