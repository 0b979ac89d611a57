//! Session logic - publish/subscribe state of one local scene
//!
//! A session decides, per flush and per subscriber, whether to send a full
//! snapshot, an incremental update or nothing. It never delivers anything
//! itself: every operation returns the [`Dispatch`]es the router has to
//! carry out.
//!
//! Two strategies share the same state machine:
//!
//! - **Direct** keeps no copy of the scene. Every active subscriber has its
//!   own baseline; a new subscriber waits for the next flush and then gets a
//!   snapshot described by the scene graph.
//! - **ShadowCopy** mirrors the scene as of the last flush. All active
//!   subscribers share one baseline and a new subscriber gets the mirror as a
//!   snapshot right away.

use crate::source::SceneGraphSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use void_ir::{
    DeltaLog, FlushInfo, ParticipantId, PublishMode, ResourceChanges, SceneId, SceneReferenceAction,
    SceneResourceAction, SceneResourceSet, SceneUpdate, SizeInfo, TimeInfo, MAX_ENTITY_COUNT,
};
use void_resource::{ContentHash, ResourceHandle, ResourceStore};

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Scene is not published")]
    NotPublished,

    #[error("Scene is already published as {0:?}")]
    AlreadyPublished(PublishMode),

    #[error("Inconsistent size accounting: {0}")]
    Inconsistent(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Session strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Per-subscriber baselines, snapshots described by the scene graph
    #[default]
    Direct,
    /// Shared baseline, snapshots from a mirror of the last flushed state
    ShadowCopy,
}

/// Publication state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unpublished,
    Published(PublishMode),
}

/// Subscriber status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberStatus {
    /// Waiting for its first snapshot
    Waiting,
    /// Receiving incremental updates
    Active,
}

/// An update and who gets it
#[derive(Debug)]
pub struct Dispatch {
    /// Recipients sharing this update
    pub recipients: Vec<ParticipantId>,
    /// The update
    pub update: SceneUpdate,
    /// Whether the update is a full snapshot
    pub snapshot: bool,
}

/// Session statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Flush calls accepted
    pub flushes: u64,
    /// Accepted flushes that sent nothing
    pub skipped_flushes: u64,
    /// Snapshot dispatches
    pub snapshots_sent: u64,
    /// Incremental dispatches
    pub increments_sent: u64,
    /// Flushes rejected for inconsistent size accounting
    pub rejected_flushes: u64,
}

/// What a recipient last received
#[derive(Debug, Clone, Default, PartialEq)]
struct Baseline {
    hashes: BTreeSet<ContentHash>,
    size_info: SizeInfo,
    expiration: Option<u64>,
}

/// Everything one flush call collected from the scene graph
struct FlushContent {
    flush_counter: u64,
    time_info: TimeInfo,
    version_tag: Option<u64>,
    actions: DeltaLog,
    scene_resource_actions: Vec<SceneResourceAction>,
    scene_reference_actions: Vec<SceneReferenceAction>,
    hashes: BTreeSet<ContentHash>,
    size_info: SizeInfo,
}

impl FlushContent {
    fn baseline(&self) -> Baseline {
        Baseline {
            hashes: self.hashes.clone(),
            size_info: self.size_info,
            expiration: self.time_info.expiration_timestamp_ms,
        }
    }
}

/// Scene state as of the last flush
#[derive(Debug, Default)]
struct ShadowCopy {
    actions: DeltaLog,
    scene_resources: SceneResourceSet,
    hashes: BTreeSet<ContentHash>,
    size_info: SizeInfo,
    time_info: TimeInfo,
    version_tag: Option<u64>,
}

impl ShadowCopy {
    /// Take over the state of a flush; `actions` describe the whole scene
    fn record(&mut self, content: &FlushContent, actions: DeltaLog) {
        self.actions = actions;
        self.scene_resources.apply_all(&content.scene_resource_actions);
        self.hashes = content.hashes.clone();
        self.size_info = content.size_info;
        self.time_info = content.time_info;
        if content.version_tag.is_some() {
            self.version_tag = content.version_tag;
        }
    }

    /// Snapshot of the mirror
    ///
    /// Link actions are carried only when the snapshot goes out with the
    /// flush that drained them.
    fn snapshot(
        &self,
        flush_counter: u64,
        scene_reference_actions: Vec<SceneReferenceAction>,
        referenced: &BTreeMap<ContentHash, ResourceHandle>,
    ) -> SceneUpdate {
        let content = FlushContent {
            flush_counter,
            time_info: self.time_info,
            version_tag: self.version_tag,
            actions: DeltaLog::new(),
            scene_resource_actions: Vec::new(),
            scene_reference_actions,
            hashes: self.hashes.clone(),
            size_info: self.size_info,
        };
        snapshot(
            &content,
            self.actions.clone(),
            self.scene_resources.create_actions(),
            referenced,
        )
    }
}

enum SessionStrategy {
    Direct {
        baselines: HashMap<ParticipantId, Baseline>,
    },
    ShadowCopy {
        mirror: Box<ShadowCopy>,
        baseline: Baseline,
    },
}

/// Publish/subscribe state of one local scene
pub struct SessionLogic {
    scene: SceneId,
    state: SessionState,
    strategy: SessionStrategy,
    subscribers: BTreeMap<ParticipantId, SubscriberStatus>,
    flush_counter: u64,
    last_size_info: Option<SizeInfo>,
    referenced: BTreeMap<ContentHash, ResourceHandle>,
    stats: SessionStats,
}

impl SessionLogic {
    /// Create an unpublished session
    pub fn new(scene: SceneId, strategy: StrategyKind) -> Self {
        let strategy = match strategy {
            StrategyKind::Direct => SessionStrategy::Direct {
                baselines: HashMap::new(),
            },
            StrategyKind::ShadowCopy => SessionStrategy::ShadowCopy {
                mirror: Box::default(),
                baseline: Baseline::default(),
            },
        };

        Self {
            scene,
            state: SessionState::Unpublished,
            strategy,
            subscribers: BTreeMap::new(),
            flush_counter: 0,
            last_size_info: None,
            referenced: BTreeMap::new(),
            stats: SessionStats::default(),
        }
    }

    /// Scene this session distributes
    pub fn scene(&self) -> SceneId {
        self.scene
    }

    /// Strategy in use
    pub fn strategy(&self) -> StrategyKind {
        match self.strategy {
            SessionStrategy::Direct { .. } => StrategyKind::Direct,
            SessionStrategy::ShadowCopy { .. } => StrategyKind::ShadowCopy,
        }
    }

    /// Publication state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Publication mode, if published
    pub fn mode(&self) -> Option<PublishMode> {
        match self.state {
            SessionState::Published(mode) => Some(mode),
            SessionState::Unpublished => None,
        }
    }

    /// Check if published
    pub fn is_published(&self) -> bool {
        self.mode().is_some()
    }

    /// Number of the last accepted flush
    pub fn flush_counter(&self) -> u64 {
        self.flush_counter
    }

    /// Status of a subscriber
    pub fn subscriber_status(&self, participant: ParticipantId) -> Option<SubscriberStatus> {
        self.subscribers.get(&participant).copied()
    }

    /// All subscribers
    pub fn subscribers(&self) -> impl Iterator<Item = (ParticipantId, SubscriberStatus)> + '_ {
        self.subscribers.iter().map(|(&id, &status)| (id, status))
    }

    /// Number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Publish the scene
    ///
    /// Returns whether the state changed. Publishing again in the same mode
    /// does nothing.
    pub fn publish(&mut self, mode: PublishMode) -> SessionResult<bool> {
        match self.state {
            SessionState::Published(current) if current == mode => Ok(false),
            SessionState::Published(current) => Err(SessionError::AlreadyPublished(current)),
            SessionState::Unpublished => {
                self.state = SessionState::Published(mode);
                log::info!("Published {} ({:?})", self.scene, mode);
                Ok(true)
            }
        }
    }

    /// Withdraw the scene and forget all subscribers
    ///
    /// Returns whether the state changed. Edits not flushed yet stay with
    /// the scene graph.
    pub fn unpublish(&mut self) -> bool {
        if self.state == SessionState::Unpublished {
            return false;
        }

        self.state = SessionState::Unpublished;
        self.subscribers.clear();
        if let SessionStrategy::Direct { baselines } = &mut self.strategy {
            baselines.clear();
        }
        log::info!("Unpublished {}", self.scene);
        true
    }

    /// Add a subscriber
    ///
    /// Adding a known subscriber does nothing.
    pub fn add_subscriber(&mut self, participant: ParticipantId) -> SessionResult<Vec<Dispatch>> {
        if !self.is_published() {
            return Err(SessionError::NotPublished);
        }
        if self.subscribers.contains_key(&participant) {
            return Ok(Vec::new());
        }

        match &self.strategy {
            SessionStrategy::ShadowCopy { mirror, .. } if self.flush_counter > 0 => {
                let update = mirror.snapshot(self.flush_counter, Vec::new(), &self.referenced);
                self.subscribers.insert(participant, SubscriberStatus::Active);
                self.stats.snapshots_sent += 1;
                log::debug!("{} subscribed to {}, sending snapshot", participant, self.scene);
                Ok(vec![Dispatch {
                    recipients: vec![participant],
                    update,
                    snapshot: true,
                }])
            }
            _ => {
                self.subscribers.insert(participant, SubscriberStatus::Waiting);
                log::debug!("{} subscribed to {}, waiting for next flush", participant, self.scene);
                Ok(Vec::new())
            }
        }
    }

    /// Remove a subscriber, returning whether it was known
    pub fn remove_subscriber(&mut self, participant: ParticipantId) -> bool {
        if let SessionStrategy::Direct { baselines } = &mut self.strategy {
            baselines.remove(&participant);
        }
        let removed = self.subscribers.remove(&participant).is_some();
        if removed {
            log::debug!("{} unsubscribed from {}", participant, self.scene);
        }
        removed
    }

    /// Flush pending edits of `source`
    ///
    /// Referenced resources are looked up in `store` and made resident
    /// before anything is returned. Fails without draining `source` when the
    /// scene is unpublished or its size accounting is inconsistent.
    pub fn flush<S>(
        &mut self,
        source: &mut S,
        store: &ResourceStore,
        time_info: TimeInfo,
        version_tag: Option<u64>,
    ) -> SessionResult<Vec<Dispatch>>
    where
        S: SceneGraphSource + ?Sized,
    {
        if !self.is_published() {
            return Err(SessionError::NotPublished);
        }

        let size_info = source.current_size_info();
        if let Err(e) = self.validate_size(&size_info) {
            self.stats.rejected_flushes += 1;
            log::error!("Rejected flush of {}: {}", self.scene, e);
            return Err(e);
        }

        self.flush_counter += 1;
        self.stats.flushes += 1;
        self.last_size_info = Some(size_info);

        let actions = source.drain_pending_actions();
        let scene_resource_actions = source.drain_scene_resource_actions();
        let scene_reference_actions = source.drain_scene_reference_actions();
        let hashes = self.refresh_references(source.current_resource_hashes(), store);

        let content = FlushContent {
            flush_counter: self.flush_counter,
            time_info,
            version_tag,
            actions,
            scene_resource_actions,
            scene_reference_actions,
            hashes,
            size_info,
        };

        let dispatches = match self.strategy() {
            StrategyKind::Direct => self.flush_direct(&content, source),
            StrategyKind::ShadowCopy => self.flush_shadow_copy(&content, source),
        };

        if dispatches.is_empty() {
            self.stats.skipped_flushes += 1;
            log::trace!("Flush {} of {} skipped", self.flush_counter, self.scene);
        }
        Ok(dispatches)
    }

    fn validate_size(&self, size_info: &SizeInfo) -> SessionResult<()> {
        if let Some(kind) = size_info.exceeding(MAX_ENTITY_COUNT) {
            return Err(SessionError::Inconsistent(format!(
                "{} count {} exceeds {}",
                kind,
                size_info.get(kind),
                MAX_ENTITY_COUNT
            )));
        }
        if let Some(previous) = &self.last_size_info {
            if let Some(kind) = size_info.shrunk_from(previous) {
                return Err(SessionError::Inconsistent(format!(
                    "{} count shrank from {} to {}",
                    kind,
                    previous.get(kind),
                    size_info.get(kind)
                )));
            }
        }
        Ok(())
    }

    /// Keep handles for every referenced hash, returning the hashes that resolved
    fn refresh_references(&mut self, hashes: BTreeSet<ContentHash>, store: &ResourceStore) -> BTreeSet<ContentHash> {
        self.referenced.retain(|hash, _| hashes.contains(hash));

        let mut available = BTreeSet::new();
        for hash in hashes {
            if !self.referenced.contains_key(&hash) {
                let Some(handle) = store.get_handle(hash) else {
                    log::warn!("{} references unknown resource {}", self.scene, hash);
                    continue;
                };
                if let Err(e) = store.resolve_handle(&handle) {
                    log::warn!("{} references unloadable resource {}: {}", self.scene, hash, e);
                    continue;
                }
                self.referenced.insert(hash, handle);
            }
            available.insert(hash);
        }
        available
    }

    fn flush_direct<S>(&mut self, content: &FlushContent, source: &S) -> Vec<Dispatch>
    where
        S: SceneGraphSource + ?Sized,
    {
        let SessionStrategy::Direct { baselines } = &mut self.strategy else {
            return Vec::new();
        };

        // Active subscribers with equal baselines share one update
        let mut groups: Vec<(Baseline, Vec<ParticipantId>)> = Vec::new();
        let mut waiting = Vec::new();
        for (&id, &status) in &self.subscribers {
            match status {
                SubscriberStatus::Waiting => waiting.push(id),
                SubscriberStatus::Active => {
                    let baseline = baselines.get(&id).cloned().unwrap_or_default();
                    match groups.iter_mut().find(|(b, _)| *b == baseline) {
                        Some((_, recipients)) => recipients.push(id),
                        None => groups.push((baseline, vec![id])),
                    }
                }
            }
        }

        let mut dispatches = Vec::new();
        for (baseline, recipients) in groups {
            if let Some(update) = increment(&baseline, content, &self.referenced) {
                for id in &recipients {
                    baselines.insert(*id, content.baseline());
                }
                self.stats.increments_sent += 1;
                dispatches.push(Dispatch {
                    recipients,
                    update,
                    snapshot: false,
                });
            }
        }

        if !waiting.is_empty() {
            let described = source.describe_scene();
            let update = snapshot(
                content,
                described.actions,
                described.scene_resource_actions,
                &self.referenced,
            );
            for id in &waiting {
                baselines.insert(*id, content.baseline());
                self.subscribers.insert(*id, SubscriberStatus::Active);
            }
            self.stats.snapshots_sent += 1;
            dispatches.push(Dispatch {
                recipients: waiting,
                update,
                snapshot: true,
            });
        }

        dispatches
    }

    fn flush_shadow_copy<S>(&mut self, content: &FlushContent, source: &S) -> Vec<Dispatch>
    where
        S: SceneGraphSource + ?Sized,
    {
        let SessionStrategy::ShadowCopy { mirror, baseline } = &mut self.strategy else {
            return Vec::new();
        };
        mirror.record(content, source.describe_scene().actions);

        let (active, waiting): (Vec<_>, Vec<_>) = self
            .subscribers
            .iter()
            .map(|(&id, &status)| (id, status))
            .partition(|(_, status)| *status == SubscriberStatus::Active);

        let mut dispatches = Vec::new();
        if let Some(update) = increment(baseline, content, &self.referenced) {
            *baseline = content.baseline();
            if !active.is_empty() {
                self.stats.increments_sent += 1;
                dispatches.push(Dispatch {
                    recipients: active.into_iter().map(|(id, _)| id).collect(),
                    update,
                    snapshot: false,
                });
            }
        }

        if !waiting.is_empty() {
            let update = mirror.snapshot(
                content.flush_counter,
                content.scene_reference_actions.clone(),
                &self.referenced,
            );
            let recipients: Vec<ParticipantId> = waiting.into_iter().map(|(id, _)| id).collect();
            for id in &recipients {
                self.subscribers.insert(*id, SubscriberStatus::Active);
            }
            self.stats.snapshots_sent += 1;
            dispatches.push(Dispatch {
                recipients,
                update,
                snapshot: true,
            });
        }

        dispatches
    }
}

/// Handles for `hashes`, in hash order
fn handles_for(
    hashes: &BTreeSet<ContentHash>,
    referenced: &BTreeMap<ContentHash, ResourceHandle>,
) -> Vec<ResourceHandle> {
    hashes.iter().filter_map(|hash| referenced.get(hash).cloned()).collect()
}

/// Incremental update against `baseline`, or `None` when there is nothing to send
fn increment(
    baseline: &Baseline,
    content: &FlushContent,
    referenced: &BTreeMap<ContentHash, ResourceHandle>,
) -> Option<SceneUpdate> {
    let mut info = FlushInfo::new(content.flush_counter, content.time_info);
    info.version_tag = content.version_tag;
    info.size_info = (content.size_info != baseline.size_info).then_some(content.size_info);
    info.resource_changes = ResourceChanges::diff(&baseline.hashes, &content.hashes)
        .with_scene_resource_actions(content.scene_resource_actions.clone());
    info.scene_reference_actions = content.scene_reference_actions.clone();

    let skippable = content.actions.is_empty()
        && !info.has_changes()
        && content.time_info.expiration_timestamp_ms == baseline.expiration
        && !content.time_info.is_time_sync_only;
    if skippable {
        return None;
    }

    let resources = handles_for(&info.resource_changes.added, referenced);
    Some(SceneUpdate::new(content.actions.clone(), resources, info))
}

/// Full update against an empty baseline
fn snapshot(
    content: &FlushContent,
    actions: DeltaLog,
    scene_resource_actions: Vec<SceneResourceAction>,
    referenced: &BTreeMap<ContentHash, ResourceHandle>,
) -> SceneUpdate {
    let mut info = FlushInfo::new(content.flush_counter, content.time_info);
    info.version_tag = content.version_tag;
    info.size_info = (!content.size_info.is_zero()).then_some(content.size_info);
    info.resource_changes = ResourceChanges::diff(&BTreeSet::new(), &content.hashes)
        .with_scene_resource_actions(scene_resource_actions);
    info.scene_reference_actions = content.scene_reference_actions.clone();

    let resources = handles_for(&info.resource_changes.added, referenced);
    SceneUpdate::new(actions, resources, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySceneSource;
    use void_ir::{EntityKind, SceneResourceActionKind};
    use void_resource::ResourceKind;

    const A: ParticipantId = ParticipantId::new(10);
    const B: ParticipantId = ParticipantId::new(11);

    fn published(strategy: StrategyKind) -> SessionLogic {
        let mut session = SessionLogic::new(SceneId::new(1), strategy);
        assert!(session.publish(PublishMode::LocalAndRemote).unwrap());
        session
    }

    fn flush(session: &mut SessionLogic, source: &mut MemorySceneSource, store: &ResourceStore) -> Vec<Dispatch> {
        session.flush(source, store, TimeInfo::new(0), None).unwrap()
    }

    #[test]
    fn test_publish_transitions() {
        let mut session = SessionLogic::new(SceneId::new(1), StrategyKind::Direct);
        assert_eq!(session.state(), SessionState::Unpublished);

        assert!(session.publish(PublishMode::LocalOnly).unwrap());
        assert!(!session.publish(PublishMode::LocalOnly).unwrap());
        assert!(matches!(
            session.publish(PublishMode::LocalAndRemote),
            Err(SessionError::AlreadyPublished(PublishMode::LocalOnly))
        ));

        assert!(session.unpublish());
        assert!(!session.unpublish());
        assert!(session.publish(PublishMode::LocalAndRemote).unwrap());
    }

    #[test]
    fn test_subscribe_requires_publish() {
        let mut session = SessionLogic::new(SceneId::new(1), StrategyKind::Direct);
        assert!(matches!(session.add_subscriber(A), Err(SessionError::NotPublished)));

        session.publish(PublishMode::LocalOnly).unwrap();
        assert!(session.add_subscriber(A).unwrap().is_empty());
        assert!(session.add_subscriber(A).unwrap().is_empty());
        assert_eq!(session.subscriber_status(A), Some(SubscriberStatus::Waiting));
        assert_eq!(session.subscriber_count(), 1);

        assert!(session.remove_subscriber(A));
        assert!(!session.remove_subscriber(A));
    }

    #[test]
    fn test_direct_new_and_established_subscribers_get_separate_updates() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);

        session.add_subscriber(A).unwrap();
        source.record(1, b"node");
        source.set_count(EntityKind::Node, 1);
        let first = flush(&mut session, &mut source, &store);
        assert_eq!(first.len(), 1);
        assert!(first[0].snapshot);
        assert_eq!(session.subscriber_status(A), Some(SubscriberStatus::Active));

        session.add_subscriber(B).unwrap();
        source.record(2, b"transform");
        let second = flush(&mut session, &mut source, &store);

        assert_eq!(second.len(), 2);
        let to_a = second.iter().find(|d| d.recipients == vec![A]).unwrap();
        let to_b = second.iter().find(|d| d.recipients == vec![B]).unwrap();

        assert!(!to_a.snapshot);
        assert_eq!(to_a.update.actions.len(), 1);
        assert_eq!(to_a.update.flush_info.size_info, None);

        assert!(to_b.snapshot);
        assert_eq!(to_b.update.actions.len(), 2);
        assert_eq!(to_b.update.flush_info.size_info.unwrap().get(EntityKind::Node), 1);
        assert_eq!(to_a.update.flush_counter(), to_b.update.flush_counter());
    }

    #[test]
    fn test_direct_empty_increment_skipped_for_established_only() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);

        session.add_subscriber(A).unwrap();
        source.record(1, b"node");
        flush(&mut session, &mut source, &store);

        session.add_subscriber(B).unwrap();
        let dispatches = flush(&mut session, &mut source, &store);

        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].recipients, vec![B]);
        assert!(dispatches[0].snapshot);
    }

    #[test]
    fn test_idempotent_skip() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);

        session.add_subscriber(A).unwrap();
        source.record(1, b"node");
        flush(&mut session, &mut source, &store);

        for _ in 0..3 {
            assert!(flush(&mut session, &mut source, &store).is_empty());
        }
        assert_eq!(session.flush_counter(), 4);
        assert_eq!(session.stats().skipped_flushes, 3);

        // Nothing was advanced by the skipped flushes
        source.record(2, b"edit");
        let dispatches = flush(&mut session, &mut source, &store);
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].update.flush_counter(), 5);
        assert!(dispatches[0].update.flush_info.resource_changes.is_empty());
    }

    #[test]
    fn test_expiration_change_is_never_skipped() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);
        session.add_subscriber(A).unwrap();
        flush(&mut session, &mut source, &store);

        let moved = session
            .flush(&mut source, &store, TimeInfo::new(5).with_expiration(100), None)
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].update.flush_info.time_info.expiration_timestamp_ms, Some(100));

        let same = session
            .flush(&mut source, &store, TimeInfo::new(6).with_expiration(100), None)
            .unwrap();
        assert!(same.is_empty());

        let sync = session
            .flush(&mut source, &store, TimeInfo::new(7).with_expiration(100).time_sync_only(), None)
            .unwrap();
        assert_eq!(sync.len(), 1);

        let tagged = session.flush(&mut source, &store, TimeInfo::new(8).with_expiration(100), Some(3)).unwrap();
        assert_eq!(tagged[0].update.flush_info.version_tag, Some(3));
    }

    #[test]
    fn test_inconsistent_size_rejected_before_draining() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);
        session.add_subscriber(A).unwrap();

        source.set_count(EntityKind::Camera, 4);
        flush(&mut session, &mut source, &store);

        source.record(1, b"pending");
        source.set_count(EntityKind::Camera, 2);
        let result = session.flush(&mut source, &store, TimeInfo::new(0), None);

        assert!(matches!(result, Err(SessionError::Inconsistent(_))));
        assert_eq!(source.pending_len(), 1);
        assert_eq!(session.flush_counter(), 1);
        assert_eq!(session.stats().rejected_flushes, 1);

        source.set_count(EntityKind::Camera, MAX_ENTITY_COUNT + 1);
        assert!(matches!(
            session.flush(&mut source, &store, TimeInfo::new(0), None),
            Err(SessionError::Inconsistent(_))
        ));

        source.set_count(EntityKind::Camera, 5);
        let dispatches = flush(&mut session, &mut source, &store);
        assert_eq!(dispatches[0].update.actions.len(), 1);
        assert_eq!(dispatches[0].update.flush_counter(), 2);
    }

    #[test]
    fn test_unpublished_flush_keeps_pending_edits() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);
        session.unpublish();

        source.record(1, b"kept");
        assert!(matches!(
            session.flush(&mut source, &store, TimeInfo::new(0), None),
            Err(SessionError::NotPublished)
        ));
        assert_eq!(source.pending_len(), 1);

        session.publish(PublishMode::LocalOnly).unwrap();
        session.add_subscriber(A).unwrap();
        session.remove_subscriber(A);
        session.add_subscriber(B).unwrap();
        let dispatches = flush(&mut session, &mut source, &store);
        assert_eq!(dispatches[0].update.actions.get(0).unwrap().payload, b"kept");
    }

    #[test]
    fn test_resource_changes_follow_references() {
        let store = ResourceStore::new();
        let first = store.put(ResourceKind::Texture2D, "a", vec![1; 32]);
        let second = store.put(ResourceKind::Texture2D, "b", vec![2; 32]);

        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);
        session.add_subscriber(A).unwrap();

        source.reference_resource(first.hash());
        let snapshot = flush(&mut session, &mut source, &store);
        assert_eq!(snapshot[0].update.resource_hashes(), vec![first.hash()]);
        drop(snapshot);

        // The session keeps the resource alive on its own
        let first_hash = first.hash();
        drop(first);
        source.release_resource(first_hash);
        source.reference_resource(second.hash());
        let increment = flush(&mut session, &mut source, &store);
        let changes = &increment[0].update.flush_info.resource_changes;

        assert_eq!(changes.added.iter().copied().collect::<Vec<_>>(), vec![second.hash()]);
        assert_eq!(changes.removed.iter().copied().collect::<Vec<_>>(), vec![first_hash]);
        assert_eq!(increment[0].update.resources.len(), 1);
        assert!(store.get_handle(first_hash).is_none());
    }

    #[test]
    fn test_unknown_resource_is_left_out() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::Direct);
        session.add_subscriber(A).unwrap();

        source.reference_resource(ContentHash::new(5, 5));
        let dispatches = flush(&mut session, &mut source, &store);
        assert!(dispatches[0].update.resources.is_empty());
        assert!(dispatches[0].update.flush_info.resource_changes.added.is_empty());
    }

    #[test]
    fn test_shadow_copy_snapshot_is_immediate() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::ShadowCopy);

        session.add_subscriber(A).unwrap();
        for i in 0..3u8 {
            source.record(i as u32, &[i]);
            flush(&mut session, &mut source, &store);
        }

        let dispatches = session.add_subscriber(B).unwrap();
        assert_eq!(dispatches.len(), 1);
        assert!(dispatches[0].snapshot);
        assert_eq!(dispatches[0].update.actions.len(), 3);
        assert_eq!(dispatches[0].update.flush_counter(), 3);
        assert_eq!(session.subscriber_status(B), Some(SubscriberStatus::Active));

        source.record(9, &[9]);
        let next = flush(&mut session, &mut source, &store);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].recipients, vec![A, B]);
        assert_eq!(next[0].update.actions.len(), 1);
    }

    #[test]
    fn test_shadow_copy_waits_before_first_flush() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::ShadowCopy);

        assert!(session.add_subscriber(A).unwrap().is_empty());
        assert_eq!(session.subscriber_status(A), Some(SubscriberStatus::Waiting));

        source.record(1, b"first");
        source.record_scene_resource(SceneResourceAction::new(
            SceneResourceActionKind::CreateRenderBuffer,
            0,
            256,
        ));
        let dispatches = flush(&mut session, &mut source, &store);
        assert_eq!(dispatches.len(), 1);
        assert!(dispatches[0].snapshot);
        assert_eq!(dispatches[0].update.flush_info.resource_changes.scene_resource_actions.len(), 1);
    }

    #[test]
    fn test_shadow_copy_late_subscriber_gets_current_state() {
        let store = ResourceStore::new();
        let texture = store.put(ResourceKind::Texture2D, "t", vec![4; 8]);
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::ShadowCopy);

        source.record(1, b"a");
        source.reference_resource(texture.hash());
        source.set_count(EntityKind::Node, 2);
        flush(&mut session, &mut source, &store);
        source.record(2, b"b");
        source.record_scene_resource(SceneResourceAction::new(
            SceneResourceActionKind::CreateDataBuffer,
            3,
            64,
        ));
        flush(&mut session, &mut source, &store);
        source.record_scene_resource(SceneResourceAction::new(
            SceneResourceActionKind::DestroyDataBuffer,
            3,
            0,
        ));
        flush(&mut session, &mut source, &store);

        let dispatches = session.add_subscriber(A).unwrap();
        let update = &dispatches[0].update;
        let payloads: Vec<&[u8]> = update.actions.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(update.resource_hashes(), vec![texture.hash()]);
        assert_eq!(update.flush_info.size_info.unwrap().get(EntityKind::Node), 2);
        assert!(update.flush_info.resource_changes.scene_resource_actions.is_empty());
    }

    #[test]
    fn test_shadow_copy_unpublish_keeps_mirror() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::ShadowCopy);

        source.record(1, b"a");
        flush(&mut session, &mut source, &store);
        session.unpublish();
        assert_eq!(session.subscriber_count(), 0);

        session.publish(PublishMode::LocalOnly).unwrap();
        let dispatches = session.add_subscriber(A).unwrap();
        assert_eq!(dispatches[0].update.actions.len(), 1);
    }

    #[test]
    fn test_shadow_copy_first_snapshot_carries_link_actions() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::ShadowCopy);
        let unlink = SceneReferenceAction::UnlinkData {
            consumer_scene: SceneId::new(2),
            consumer_slot: 6,
        };

        session.add_subscriber(A).unwrap();
        source.record(1, b"node");
        source.record_scene_reference(unlink);
        let dispatches = flush(&mut session, &mut source, &store);

        assert_eq!(dispatches.len(), 1);
        assert!(dispatches[0].snapshot);
        assert_eq!(dispatches[0].update.flush_info.scene_reference_actions, vec![unlink]);

        // Delivered once: a later subscriber's snapshot does not repeat them
        let late = session.add_subscriber(B).unwrap();
        assert!(late[0].update.flush_info.scene_reference_actions.is_empty());
    }

    #[test]
    fn test_shadow_copy_mirror_tracks_state_not_history() {
        let store = ResourceStore::new();
        let mut source = MemorySceneSource::new();
        let mut session = published(StrategyKind::ShadowCopy);

        for i in 0..1000u32 {
            source.record(1, &[(i % 256) as u8; 64]);
            flush(&mut session, &mut source, &store);
        }
        // Not flushed yet, so not part of the mirror
        source.record(2, b"pending");

        let dispatches = session.add_subscriber(A).unwrap();
        let actions = &dispatches[0].update.actions;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions.byte_len(), 64);
        assert_eq!(actions.get(0).unwrap().payload, &[(999 % 256) as u8; 64][..]);
        assert_eq!(session.flush_counter(), 1000);
    }
}
