//! Flush envelopes
//!
//! A flush bundles every graph edit since the previous flush into one
//! versioned unit. The [`FlushInfo`] carried with it is always relative to
//! the recipient's last known state: resource and size changes describe what
//! the recipient has to do to catch up, nothing more.

use crate::scene::SceneId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use void_resource::ContentHash;

/// Largest entity count a scene may declare for any kind
pub const MAX_ENTITY_COUNT: u32 = i32::MAX as u32;

/// Kinds of scene entities tracked by size accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Node = 0,
    Transform,
    Renderable,
    RenderState,
    Camera,
    RenderGroup,
    RenderPass,
    BlitPass,
    DataLayout,
    DataInstance,
    TextureSampler,
    RenderTarget,
    RenderBuffer,
    DataSlot,
    PickObject,
    SceneReference,
}

impl EntityKind {
    /// Number of entity kinds
    pub const COUNT: usize = 16;

    /// All kinds in slot order
    pub const ALL: [EntityKind; Self::COUNT] = [
        Self::Node,
        Self::Transform,
        Self::Renderable,
        Self::RenderState,
        Self::Camera,
        Self::RenderGroup,
        Self::RenderPass,
        Self::BlitPass,
        Self::DataLayout,
        Self::DataInstance,
        Self::TextureSampler,
        Self::RenderTarget,
        Self::RenderBuffer,
        Self::DataSlot,
        Self::PickObject,
        Self::SceneReference,
    ];

    /// Slot of this kind in a [`SizeInfo`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Get kind name
    pub fn name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Transform => "transform",
            Self::Renderable => "renderable",
            Self::RenderState => "render_state",
            Self::Camera => "camera",
            Self::RenderGroup => "render_group",
            Self::RenderPass => "render_pass",
            Self::BlitPass => "blit_pass",
            Self::DataLayout => "data_layout",
            Self::DataInstance => "data_instance",
            Self::TextureSampler => "texture_sampler",
            Self::RenderTarget => "render_target",
            Self::RenderBuffer => "render_buffer",
            Self::DataSlot => "data_slot",
            Self::PickObject => "pick_object",
            Self::SceneReference => "scene_reference",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-kind entity counts of a scene
///
/// Counts are capacities: the highest handle ever allocated for a kind plus
/// one. They never shrink during a scene's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeInfo {
    counts: [u32; EntityKind::COUNT],
}

impl SizeInfo {
    /// All counts zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw counts in [`EntityKind::ALL`] order
    pub fn from_counts(counts: [u32; EntityKind::COUNT]) -> Self {
        Self { counts }
    }

    /// Raw counts in [`EntityKind::ALL`] order
    pub fn counts(&self) -> &[u32; EntityKind::COUNT] {
        &self.counts
    }

    /// Get count for a kind
    pub fn get(&self, kind: EntityKind) -> u32 {
        self.counts[kind.index()]
    }

    /// Set count for a kind
    pub fn set(&mut self, kind: EntityKind, count: u32) {
        self.counts[kind.index()] = count;
    }

    /// Set count for a kind (builder pattern)
    pub fn with(mut self, kind: EntityKind, count: u32) -> Self {
        self.set(kind, count);
        self
    }

    /// Check if every count is zero
    pub fn is_zero(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// First kind whose count is above `limit`
    pub fn exceeding(&self, limit: u32) -> Option<EntityKind> {
        EntityKind::ALL.into_iter().find(|&kind| self.get(kind) > limit)
    }

    /// First kind whose count is lower than in `previous`
    pub fn shrunk_from(&self, previous: &SizeInfo) -> Option<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .find(|&kind| self.get(kind) < previous.get(kind))
    }
}

/// Clock domain of timestamps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockKind {
    /// Wall clock of the producing machine
    #[default]
    System,
    /// Network-synchronized clock
    Ptp,
}

/// Timing of a flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInfo {
    /// When the flush was produced (milliseconds)
    pub internal_timestamp_ms: u64,
    /// When the flushed content stops being valid (milliseconds)
    pub expiration_timestamp_ms: Option<u64>,
    /// Clock the timestamps refer to
    pub clock_kind: ClockKind,
    /// Flush exists only to move the expiration forward
    pub is_time_sync_only: bool,
}

impl TimeInfo {
    /// Create time info for a timestamp
    pub fn new(internal_timestamp_ms: u64) -> Self {
        Self {
            internal_timestamp_ms,
            ..Default::default()
        }
    }

    /// Create time info stamped with the system clock
    pub fn now() -> Self {
        let timestamp = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as u64,
            Err(_) => {
                log::warn!("System clock is before the UNIX epoch, using timestamp 0");
                0
            }
        };
        Self::new(timestamp)
    }

    /// Set expiration (builder pattern)
    pub fn with_expiration(mut self, expiration_timestamp_ms: u64) -> Self {
        self.expiration_timestamp_ms = Some(expiration_timestamp_ms);
        self
    }

    /// Set clock kind (builder pattern)
    pub fn with_clock(mut self, clock_kind: ClockKind) -> Self {
        self.clock_kind = clock_kind;
        self
    }

    /// Mark as time-sync only (builder pattern)
    pub fn time_sync_only(mut self) -> Self {
        self.is_time_sync_only = true;
        self
    }
}

/// Scene-owned GPU resource operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SceneResourceActionKind {
    CreateRenderBuffer,
    DestroyRenderBuffer,
    CreateRenderTarget,
    DestroyRenderTarget,
    CreateBlitPass,
    DestroyBlitPass,
    CreateDataBuffer,
    UpdateDataBuffer,
    DestroyDataBuffer,
    CreateTextureBuffer,
    UpdateTextureBuffer,
    DestroyTextureBuffer,
}

impl SceneResourceActionKind {
    /// Check if the action releases the resource
    pub fn is_destroy(&self) -> bool {
        matches!(
            self,
            Self::DestroyRenderBuffer
                | Self::DestroyRenderTarget
                | Self::DestroyBlitPass
                | Self::DestroyDataBuffer
                | Self::DestroyTextureBuffer
        )
    }

    /// Check if the action allocates the resource
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateRenderBuffer
                | Self::CreateRenderTarget
                | Self::CreateBlitPass
                | Self::CreateDataBuffer
                | Self::CreateTextureBuffer
        )
    }

    /// Create action of the same resource type
    pub fn create_kind(&self) -> Self {
        match self {
            Self::CreateRenderBuffer | Self::DestroyRenderBuffer => Self::CreateRenderBuffer,
            Self::CreateRenderTarget | Self::DestroyRenderTarget => Self::CreateRenderTarget,
            Self::CreateBlitPass | Self::DestroyBlitPass => Self::CreateBlitPass,
            Self::CreateDataBuffer | Self::UpdateDataBuffer | Self::DestroyDataBuffer => Self::CreateDataBuffer,
            Self::CreateTextureBuffer | Self::UpdateTextureBuffer | Self::DestroyTextureBuffer => {
                Self::CreateTextureBuffer
            }
        }
    }
}

/// One scene-owned resource operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneResourceAction {
    /// Operation
    pub kind: SceneResourceActionKind,
    /// Scene-local resource handle
    pub handle: u32,
    /// Size of the resource in bytes
    pub byte_size: u32,
}

impl SceneResourceAction {
    /// Create an action
    pub fn new(kind: SceneResourceActionKind, handle: u32, byte_size: u32) -> Self {
        Self {
            kind,
            handle,
            byte_size,
        }
    }
}

/// Scene resources currently alive, as the create actions rebuilding them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneResourceSet {
    live: BTreeMap<(SceneResourceActionKind, u32), SceneResourceAction>,
}

impl SceneResourceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one action
    ///
    /// Updates of resources that were never created are ignored.
    pub fn apply(&mut self, action: &SceneResourceAction) {
        let key = (action.kind.create_kind(), action.handle);
        if action.kind.is_create() {
            self.live.insert(key, *action);
        } else if action.kind.is_destroy() {
            self.live.remove(&key);
        } else if let Some(existing) = self.live.get_mut(&key) {
            existing.byte_size = action.byte_size;
        }
    }

    /// Apply actions in order
    pub fn apply_all<'a>(&mut self, actions: impl IntoIterator<Item = &'a SceneResourceAction>) {
        for action in actions {
            self.apply(action);
        }
    }

    /// Create actions for every live resource
    pub fn create_actions(&self) -> Vec<SceneResourceAction> {
        self.live.values().copied().collect()
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Check if no resource is alive
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Data links between scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneReferenceAction {
    /// Feed a consumer slot from a provider slot
    LinkData {
        provider_scene: SceneId,
        provider_slot: u32,
        consumer_scene: SceneId,
        consumer_slot: u32,
    },
    /// Detach a consumer slot
    UnlinkData {
        consumer_scene: SceneId,
        consumer_slot: u32,
    },
    /// Ask to be told when a referenced scene flushes
    RequestFlushNotifications {
        referenced_scene: SceneId,
        enabled: bool,
    },
}

/// Resource changes relative to a recipient's last state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChanges {
    /// Hashes the recipient does not have yet
    pub added: BTreeSet<ContentHash>,
    /// Hashes the recipient may release
    pub removed: BTreeSet<ContentHash>,
    /// Scene-owned resource operations
    pub scene_resource_actions: Vec<SceneResourceAction>,
}

impl ResourceChanges {
    /// Diff a recipient's last hash set against the current one
    pub fn diff(last: &BTreeSet<ContentHash>, current: &BTreeSet<ContentHash>) -> Self {
        Self {
            added: current.difference(last).copied().collect(),
            removed: last.difference(current).copied().collect(),
            scene_resource_actions: Vec::new(),
        }
    }

    /// Attach scene resource actions (builder pattern)
    pub fn with_scene_resource_actions(mut self, actions: Vec<SceneResourceAction>) -> Self {
        self.scene_resource_actions = actions;
        self
    }

    /// Check if nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.scene_resource_actions.is_empty()
    }
}

/// Consistency envelope of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushInfo {
    /// Per-scene flush number, 1 on the first flush
    pub flush_counter: u64,
    /// Application version tag
    pub version_tag: Option<u64>,
    /// Timing
    pub time_info: TimeInfo,
    /// Entity counts, present only when they changed for this recipient
    pub size_info: Option<SizeInfo>,
    /// Resource changes for this recipient
    pub resource_changes: ResourceChanges,
    /// Inter-scene data links
    pub scene_reference_actions: Vec<SceneReferenceAction>,
}

impl FlushInfo {
    /// Create an envelope with no changes
    pub fn new(flush_counter: u64, time_info: TimeInfo) -> Self {
        Self {
            flush_counter,
            time_info,
            ..Default::default()
        }
    }

    /// Check if the envelope carries any change besides timing
    pub fn has_changes(&self) -> bool {
        self.version_tag.is_some()
            || self.size_info.is_some()
            || !self.resource_changes.is_empty()
            || !self.scene_reference_actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(values: &[u64]) -> BTreeSet<ContentHash> {
        values.iter().map(|&v| ContentHash::new(v, 0)).collect()
    }

    #[test]
    fn test_entity_kind_slots() {
        for (i, kind) in EntityKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(EntityKind::SceneReference.index(), EntityKind::COUNT - 1);
        assert_eq!(EntityKind::RenderPass.to_string(), "render_pass");
    }

    #[test]
    fn test_size_info_validation_helpers() {
        let previous = SizeInfo::new().with(EntityKind::Node, 10).with(EntityKind::Camera, 2);
        let grown = previous.with(EntityKind::Node, 12);
        let shrunk = previous.with(EntityKind::Camera, 1);

        assert_eq!(grown.shrunk_from(&previous), None);
        assert_eq!(shrunk.shrunk_from(&previous), Some(EntityKind::Camera));

        let overflowing = SizeInfo::new().with(EntityKind::PickObject, MAX_ENTITY_COUNT + 1);
        assert_eq!(overflowing.exceeding(MAX_ENTITY_COUNT), Some(EntityKind::PickObject));
        assert_eq!(grown.exceeding(MAX_ENTITY_COUNT), None);
        assert!(SizeInfo::new().is_zero());
    }

    #[test]
    fn test_resource_diff() {
        let changes = ResourceChanges::diff(&hashes(&[1, 2, 3]), &hashes(&[2, 3, 4, 5]));
        assert_eq!(changes.added, hashes(&[4, 5]));
        assert_eq!(changes.removed, hashes(&[1]));

        let from_nothing = ResourceChanges::diff(&BTreeSet::new(), &hashes(&[7]));
        assert_eq!(from_nothing.added, hashes(&[7]));
        assert!(from_nothing.removed.is_empty());

        assert!(ResourceChanges::diff(&hashes(&[1]), &hashes(&[1])).is_empty());
    }

    #[test]
    fn test_flush_info_changes() {
        let mut info = FlushInfo::new(1, TimeInfo::new(100).with_expiration(200));
        assert!(!info.has_changes());

        info.version_tag = Some(3);
        assert!(info.has_changes());

        let mut info = FlushInfo::new(2, TimeInfo::default());
        info.scene_reference_actions.push(SceneReferenceAction::UnlinkData {
            consumer_scene: SceneId::new(1),
            consumer_slot: 4,
        });
        assert!(info.has_changes());
    }

    #[test]
    fn test_scene_resource_action_kinds() {
        let create = SceneResourceActionKind::CreateTextureBuffer;
        assert!(create.is_create());
        assert_eq!(SceneResourceActionKind::DestroyTextureBuffer.create_kind(), create);
        assert!(SceneResourceActionKind::DestroyBlitPass.is_destroy());
        assert!(!SceneResourceActionKind::UpdateDataBuffer.is_create());
        assert_eq!(
            SceneResourceActionKind::UpdateTextureBuffer.create_kind(),
            SceneResourceActionKind::CreateTextureBuffer
        );
    }

    #[test]
    fn test_scene_resource_set() {
        use SceneResourceActionKind::*;

        let mut set = SceneResourceSet::new();
        set.apply_all(&[
            SceneResourceAction::new(CreateDataBuffer, 0, 64),
            SceneResourceAction::new(CreateRenderBuffer, 0, 1024),
            SceneResourceAction::new(UpdateDataBuffer, 0, 128),
            SceneResourceAction::new(UpdateTextureBuffer, 9, 16),
            SceneResourceAction::new(CreateBlitPass, 1, 0),
            SceneResourceAction::new(DestroyBlitPass, 1, 0),
        ]);

        assert_eq!(
            set.create_actions(),
            vec![
                SceneResourceAction::new(CreateRenderBuffer, 0, 1024),
                SceneResourceAction::new(CreateDataBuffer, 0, 128),
            ]
        );
        assert_eq!(set.len(), 2);
    }
}
