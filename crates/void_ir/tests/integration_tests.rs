//! Integration tests for void_ir crate
//!
//! Tests envelope serialization and delta accumulation across flushes

use std::collections::BTreeSet;

use void_ir::*;
use void_resource::{ContentHash, ResourceKind, ResourceStore};

#[test]
fn test_flush_info_bincode_round_trip() {
    let mut info = FlushInfo::new(7, TimeInfo::new(1_000).with_expiration(1_500).with_clock(ClockKind::Ptp));
    info.version_tag = Some(42);
    info.size_info = Some(SizeInfo::new().with(EntityKind::Node, 3).with(EntityKind::Camera, 1));
    info.resource_changes = ResourceChanges::diff(
        &BTreeSet::new(),
        &[ContentHash::new(1, 2), ContentHash::new(3, 4)].into_iter().collect(),
    )
    .with_scene_resource_actions(vec![SceneResourceAction::new(
        SceneResourceActionKind::CreateRenderBuffer,
        0,
        4096,
    )]);
    info.scene_reference_actions.push(SceneReferenceAction::LinkData {
        provider_scene: SceneId::new(1),
        provider_slot: 2,
        consumer_scene: SceneId::new(3),
        consumer_slot: 4,
    });

    let bytes = bincode::serialize(&info).expect("Failed to serialize");
    let decoded: FlushInfo = bincode::deserialize(&bytes).expect("Failed to deserialize");

    assert_eq!(decoded, info);
}

#[test]
fn test_delta_log_accumulates_union_of_flushes() {
    let mut mirror = DeltaLog::new();
    let flushes = [
        DeltaLog::new().with_record(1, b"create node"),
        DeltaLog::new().with_record(2, b"set transform").with_record(3, b"attach"),
        DeltaLog::new(),
        DeltaLog::new().with_record(4, b"destroy"),
    ];

    for flush in &flushes {
        mirror.extend_from(flush);
    }

    let kinds: Vec<u32> = mirror.iter().map(|entry| entry.kind).collect();
    assert_eq!(kinds, vec![1, 2, 3, 4]);
    assert_eq!(mirror.get(1).unwrap().payload, b"set transform");

    let bytes = bincode::serialize(&mirror).unwrap();
    let decoded: DeltaLog = bincode::deserialize(&bytes).unwrap();
    assert_eq!(decoded, mirror);
    assert!(decoded.is_well_formed());
}

#[test]
fn test_scene_update_carries_store_handles() {
    let store = ResourceStore::new();
    let texture = store.put(ResourceKind::Texture2D, "albedo", vec![1, 2, 3, 4]);

    let mut info = FlushInfo::new(1, TimeInfo::now());
    info.resource_changes.added.insert(texture.hash());

    let update = SceneUpdate::new(DeltaLog::new().with_record(9, &[0]), vec![texture.clone()], info);

    assert_eq!(update.resource_hashes(), vec![texture.hash()]);
    assert_eq!(texture.ref_count(), 2);

    drop(update);
    assert_eq!(texture.ref_count(), 1);
}

#[test]
fn test_scene_info_modes() {
    let info = SceneInfo::new(SceneId::new(5), "main", ParticipantId::new(1), PublishMode::LocalAndRemote);
    assert!(info.mode.allows_remote());
    assert!(!PublishMode::LocalOnly.allows_remote());
    assert_eq!(info.id.to_string(), "scene#5");
    assert_eq!(info.provider.to_string(), "participant#1");
}
