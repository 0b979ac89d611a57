//! # Void IR - Scene Update Representation
//!
//! Scene graphs do not talk to renderers directly - they record edits into a
//! delta log that is flushed, wrapped into a versioned envelope and shipped
//! as a scene update to every subscribed renderer.
//!
//! ## Architecture
//!
//! ```text
//! Scene edits ──► DeltaLog ──┐
//!                            ├──► SceneUpdate ──► local renderer / packetizer
//! FlushInfo ─────────────────┤
//! ResourceHandles ───────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **DeltaLog**: ordered, opaque graph-edit records
//! - **FlushInfo**: the consistency envelope of one flush
//! - **SceneUpdate**: the unit of transfer between participants
//! - **SceneId / ParticipantId**: addressing

pub mod delta;
pub mod flush;
pub mod scene;
pub mod update;

pub use delta::{DeltaEntry, DeltaLog};
pub use flush::{
    ClockKind, EntityKind, FlushInfo, ResourceChanges, SceneReferenceAction, SceneResourceAction,
    SceneResourceActionKind, SceneResourceSet, SizeInfo, TimeInfo, MAX_ENTITY_COUNT,
};
pub use scene::{ParticipantId, PublishMode, SceneId, SceneInfo};
pub use update::SceneUpdate;
