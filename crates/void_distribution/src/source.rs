//! Collaborator interfaces
//!
//! The scene graph, the renderer and the transport live outside this crate.
//! Sessions and the router reach them only through these traits.

use std::collections::{BTreeMap, BTreeSet};
use void_ir::{
    DeltaLog, EntityKind, ParticipantId, SceneId, SceneInfo, SceneReferenceAction, SceneResourceAction,
    SceneResourceSet, SceneUpdate, SizeInfo,
};
use void_protocol::DistributionMessage;
use void_resource::ContentHash;

/// Full description of a scene's current state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneSnapshot {
    /// Edits rebuilding the scene from nothing
    pub actions: DeltaLog,
    /// Create actions for every live scene resource
    pub scene_resource_actions: Vec<SceneResourceAction>,
}

/// The scene graph producing a scene
pub trait SceneGraphSource {
    /// Take every edit recorded since the last call
    fn drain_pending_actions(&mut self) -> DeltaLog;

    /// Take scene resource actions recorded since the last call
    fn drain_scene_resource_actions(&mut self) -> Vec<SceneResourceAction> {
        Vec::new()
    }

    /// Take inter-scene link actions recorded since the last call
    fn drain_scene_reference_actions(&mut self) -> Vec<SceneReferenceAction> {
        Vec::new()
    }

    /// Hashes of every resource the scene references now
    fn current_resource_hashes(&self) -> BTreeSet<ContentHash>;

    /// Entity counts now
    fn current_size_info(&self) -> SizeInfo;

    /// Describe the whole scene as it is now
    fn describe_scene(&self) -> SceneSnapshot;
}

/// A renderer consuming scenes
pub trait RendererSink {
    /// Apply an update to a scene
    fn apply(&mut self, scene: SceneId, update: SceneUpdate);

    /// A scene can be subscribed to
    fn on_scene_available(&mut self, info: SceneInfo);

    /// A scene went away
    fn on_scene_unavailable(&mut self, scene: SceneId);
}

/// Connection to remote participants
pub trait PacketSink {
    /// Send raw bytes to a participant, returning false on failure
    fn send(&mut self, participant: ParticipantId, bytes: &[u8]) -> bool;

    /// Send an encoded message to a participant
    fn send_message(&mut self, participant: ParticipantId, message: &DistributionMessage) -> bool {
        match message.encode() {
            Ok(bytes) => self.send(participant, &bytes),
            Err(e) => {
                log::error!("Failed to encode {} for {}: {}", message.name(), participant, e);
                false
            }
        }
    }
}

/// Scene source keeping its state in memory
///
/// Useful for tools and tests that drive a session without a real scene
/// graph. Every recorded edit is pending for the next flush. The scene is
/// described by the latest edit of each record kind, in kind order.
#[derive(Debug, Default)]
pub struct MemorySceneSource {
    pending: DeltaLog,
    state: BTreeMap<u32, Vec<u8>>,
    pending_scene_resources: Vec<SceneResourceAction>,
    scene_resources: SceneResourceSet,
    pending_references: Vec<SceneReferenceAction>,
    resources: BTreeSet<ContentHash>,
    size_info: SizeInfo,
}

impl MemorySceneSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one edit
    pub fn record(&mut self, kind: u32, payload: &[u8]) {
        self.pending.append(kind, payload);
        self.state.insert(kind, payload.to_vec());
    }

    /// Record a scene resource action
    pub fn record_scene_resource(&mut self, action: SceneResourceAction) {
        self.scene_resources.apply(&action);
        self.pending_scene_resources.push(action);
    }

    /// Record an inter-scene link action
    pub fn record_scene_reference(&mut self, action: SceneReferenceAction) {
        self.pending_references.push(action);
    }

    /// Start referencing a resource
    pub fn reference_resource(&mut self, hash: ContentHash) {
        self.resources.insert(hash);
    }

    /// Stop referencing a resource
    pub fn release_resource(&mut self, hash: ContentHash) {
        self.resources.remove(&hash);
    }

    /// Set the count of an entity kind
    pub fn set_count(&mut self, kind: EntityKind, count: u32) {
        self.size_info.set(kind, count);
    }

    /// Number of edits waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl SceneGraphSource for MemorySceneSource {
    fn drain_pending_actions(&mut self) -> DeltaLog {
        self.pending.take()
    }

    fn drain_scene_resource_actions(&mut self) -> Vec<SceneResourceAction> {
        std::mem::take(&mut self.pending_scene_resources)
    }

    fn drain_scene_reference_actions(&mut self) -> Vec<SceneReferenceAction> {
        std::mem::take(&mut self.pending_references)
    }

    fn current_resource_hashes(&self) -> BTreeSet<ContentHash> {
        self.resources.clone()
    }

    fn current_size_info(&self) -> SizeInfo {
        self.size_info
    }

    fn describe_scene(&self) -> SceneSnapshot {
        let mut actions = DeltaLog::new();
        for (&kind, payload) in &self.state {
            actions.append(kind, payload);
        }
        SceneSnapshot {
            actions,
            scene_resource_actions: self.scene_resources.create_actions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_ir::SceneResourceActionKind;

    #[test]
    fn test_memory_source_drains_pending_only() {
        let mut source = MemorySceneSource::new();
        source.record(1, &[1]);
        source.record(2, &[2]);

        assert_eq!(source.drain_pending_actions().len(), 2);
        assert_eq!(source.pending_len(), 0);

        source.record(3, &[3]);
        assert_eq!(source.drain_pending_actions().len(), 1);
        assert_eq!(source.describe_scene().actions.len(), 3);
    }

    #[test]
    fn test_memory_source_describes_latest_edit_per_kind() {
        let mut source = MemorySceneSource::new();
        source.record(2, b"old");
        source.record(1, b"other");
        source.record(2, b"new");

        assert_eq!(source.pending_len(), 3);
        let actions = source.describe_scene().actions;
        let payloads: Vec<&[u8]> = actions.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![&b"other"[..], &b"new"[..]]);
    }

    #[test]
    fn test_memory_source_scene_resources() {
        let mut source = MemorySceneSource::new();
        source.record_scene_resource(SceneResourceAction::new(SceneResourceActionKind::CreateRenderTarget, 3, 0));
        source.record_scene_resource(SceneResourceAction::new(SceneResourceActionKind::CreateDataBuffer, 1, 32));
        source.record_scene_resource(SceneResourceAction::new(SceneResourceActionKind::DestroyDataBuffer, 1, 0));

        assert_eq!(source.drain_scene_resource_actions().len(), 3);
        assert!(source.drain_scene_resource_actions().is_empty());
        assert_eq!(source.describe_scene().scene_resource_actions.len(), 1);
    }

    #[test]
    fn test_packet_sink_default_encodes_messages() {
        struct Capture(Vec<Vec<u8>>);
        impl PacketSink for Capture {
            fn send(&mut self, _participant: ParticipantId, bytes: &[u8]) -> bool {
                self.0.push(bytes.to_vec());
                true
            }
        }

        let message = DistributionMessage::Unsubscribe {
            scene: SceneId::new(4),
            subscriber: ParticipantId::new(2),
        };
        let mut sink = Capture(Vec::new());
        assert!(sink.send_message(ParticipantId::new(9), &message));
        assert_eq!(DistributionMessage::decode(&sink.0[0]).unwrap(), message);
    }
}
