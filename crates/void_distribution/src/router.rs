//! Distribution router
//!
//! Owns the sessions of every local scene, tracks scenes offered by remote
//! participants and moves updates to their recipients. Local recipients get
//! the update handed to the renderer; remote recipients get it packetized
//! and sent as [`DistributionMessage::UpdatePacket`]s.

use crate::config::DistributionConfig;
use crate::session::{Dispatch, SessionLogic};
use crate::source::{PacketSink, RendererSink, SceneGraphSource};
use crate::transport::Envelope;
use crate::{DistributionError, DistributionResult};
use crossbeam_channel::Receiver;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use void_ir::{ParticipantId, PublishMode, SceneId, SceneInfo, SceneUpdate, TimeInfo};
use void_protocol::{
    DepacketizeResult, DepacketizerState, DistributionMessage, Trailer, UpdateDepacketizer, UpdatePacketizer,
};
use void_resource::ResourceStore;

/// Router statistics
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    /// Updates handed to the local renderer
    pub local_deliveries: u64,
    /// Updates fully sent to a remote participant
    pub remote_updates_sent: u64,
    /// Update packets sent
    pub packets_sent: u64,
    /// Updates that could not be sent to a remote participant
    pub send_failures: u64,
    /// Remote updates reassembled
    pub updates_received: u64,
    /// Remote updates lost to malformed or missing packets
    pub updates_dropped: u64,
    /// Messages ignored as undecodable or not allowed
    pub messages_rejected: u64,
}

/// A scene produced by this participant
struct LocalScene {
    info: SceneInfo,
    session: SessionLogic,
}

/// Reassembly state of one remote scene's update stream
#[derive(Default)]
struct InboundStream {
    depacketizer: UpdateDepacketizer,
    /// Skipping the rest of an update that failed to decode
    discarding: bool,
}

/// Sequence number of a packet, if it has one
fn packet_sequence(packet: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = packet.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Routes scene updates between sessions, the local renderer and remote participants
pub struct DistributionRouter {
    config: DistributionConfig,
    local: ParticipantId,
    store: Arc<ResourceStore>,
    scenes: HashMap<SceneId, LocalScene>,
    remote_scenes: BTreeMap<SceneId, SceneInfo>,
    remote_subscriptions: BTreeSet<SceneId>,
    inbound: HashMap<(ParticipantId, SceneId), InboundStream>,
    peers: BTreeSet<ParticipantId>,
    renderer: Box<dyn RendererSink + Send>,
    transport: Box<dyn PacketSink + Send>,
    packetizer: UpdatePacketizer,
    buffer: Vec<u8>,
    stats: RouterStats,
}

impl DistributionRouter {
    /// Create a router
    pub fn new(
        config: DistributionConfig,
        store: Arc<ResourceStore>,
        renderer: Box<dyn RendererSink + Send>,
        transport: Box<dyn PacketSink + Send>,
    ) -> DistributionResult<Self> {
        config.validate()?;
        let local = config.participant_id();
        let buffer = vec![0; config.packet_size];
        log::info!(
            "Distribution router for {} ({:?}, {} byte packets)",
            local,
            config.strategy,
            config.packet_size
        );

        Ok(Self {
            config,
            local,
            store,
            scenes: HashMap::new(),
            remote_scenes: BTreeMap::new(),
            remote_subscriptions: BTreeSet::new(),
            inbound: HashMap::new(),
            peers: BTreeSet::new(),
            renderer,
            transport,
            packetizer: UpdatePacketizer::new(),
            buffer,
            stats: RouterStats::default(),
        })
    }

    /// This participant
    pub fn local_id(&self) -> ParticipantId {
        self.local
    }

    /// Get configuration
    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Session of a local scene
    pub fn session(&self, scene: SceneId) -> Option<&SessionLogic> {
        self.scenes.get(&scene).map(|s| &s.session)
    }

    /// Info of a local or remote scene
    pub fn scene_info(&self, scene: SceneId) -> Option<&SceneInfo> {
        self.scenes
            .get(&scene)
            .map(|s| &s.info)
            .or_else(|| self.remote_scenes.get(&scene))
    }

    /// Scenes offered by remote participants
    pub fn remote_scenes(&self) -> impl Iterator<Item = &SceneInfo> {
        self.remote_scenes.values()
    }

    /// Check if subscribed to a remote scene
    pub fn is_subscribed(&self, scene: SceneId) -> bool {
        self.remote_subscriptions.contains(&scene)
    }

    /// Connected participants
    pub fn peers(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.peers.iter().copied()
    }

    // ---------------------------------------------------------------
    // Local scenes
    // ---------------------------------------------------------------

    /// Register a local scene
    pub fn create_scene(&mut self, scene: SceneId, name: impl Into<String>) -> DistributionResult<()> {
        if self.scenes.contains_key(&scene) || self.remote_scenes.contains_key(&scene) {
            return Err(DistributionError::SceneExists(scene));
        }

        let info = SceneInfo::new(scene, name, self.local, PublishMode::LocalOnly);
        let session = SessionLogic::new(scene, self.config.strategy);
        log::debug!("Created {} '{}'", scene, info.name);
        self.scenes.insert(scene, LocalScene { info, session });
        Ok(())
    }

    /// Unpublish and forget a local scene
    pub fn destroy_scene(&mut self, scene: SceneId) -> DistributionResult<()> {
        self.unpublish(scene)?;
        self.scenes.remove(&scene);
        log::debug!("Destroyed {}", scene);
        Ok(())
    }

    /// Publish a local scene
    ///
    /// The local renderer is told about the scene and, for remote modes,
    /// so is every connected participant.
    pub fn publish(&mut self, scene: SceneId, mode: PublishMode) -> DistributionResult<()> {
        if mode.allows_remote() && !self.config.allow_remote {
            return Err(DistributionError::RemoteNotAllowed);
        }

        let entry = self
            .scenes
            .get_mut(&scene)
            .ok_or(DistributionError::SceneNotFound(scene))?;
        if !entry.session.publish(mode)? {
            return Ok(());
        }
        entry.info.mode = mode;
        let info = entry.info.clone();

        self.renderer.on_scene_available(info.clone());
        if mode.allows_remote() {
            let message = DistributionMessage::SceneAvailable(info);
            for &peer in &self.peers {
                self.transport.send_message(peer, &message);
            }
        }
        Ok(())
    }

    /// Withdraw a local scene
    pub fn unpublish(&mut self, scene: SceneId) -> DistributionResult<()> {
        let entry = self
            .scenes
            .get_mut(&scene)
            .ok_or(DistributionError::SceneNotFound(scene))?;
        let Some(mode) = entry.session.mode() else {
            return Ok(());
        };
        entry.session.unpublish();

        self.renderer.on_scene_unavailable(scene);
        if mode.allows_remote() {
            let message = DistributionMessage::SceneUnavailable {
                scene,
                provider: self.local,
            };
            for &peer in &self.peers {
                self.transport.send_message(peer, &message);
            }
        }
        Ok(())
    }

    /// Flush pending edits of a local scene to its subscribers
    ///
    /// Returns whether at least one recipient got an update.
    pub fn flush<S>(
        &mut self,
        scene: SceneId,
        source: &mut S,
        time_info: TimeInfo,
        version_tag: Option<u64>,
    ) -> DistributionResult<bool>
    where
        S: SceneGraphSource + ?Sized,
    {
        let entry = self
            .scenes
            .get_mut(&scene)
            .ok_or(DistributionError::SceneNotFound(scene))?;
        let dispatches = entry.session.flush(source, &self.store, time_info, version_tag)?;

        Ok(self.deliver(scene, dispatches))
    }

    // ---------------------------------------------------------------
    // Subscriptions of the local renderer
    // ---------------------------------------------------------------

    /// Subscribe the local renderer to a scene
    pub fn subscribe(&mut self, scene: SceneId) -> DistributionResult<()> {
        if let Some(entry) = self.scenes.get_mut(&scene) {
            let dispatches = entry.session.add_subscriber(self.local)?;
            self.deliver(scene, dispatches);
            return Ok(());
        }

        let provider = self
            .remote_scenes
            .get(&scene)
            .map(|info| info.provider)
            .ok_or(DistributionError::SceneNotFound(scene))?;
        if self.remote_subscriptions.insert(scene) {
            let message = DistributionMessage::Subscribe {
                scene,
                subscriber: self.local,
            };
            self.transport.send_message(provider, &message);
        }
        Ok(())
    }

    /// Unsubscribe the local renderer from a scene
    pub fn unsubscribe(&mut self, scene: SceneId) -> DistributionResult<()> {
        if let Some(entry) = self.scenes.get_mut(&scene) {
            entry.session.remove_subscriber(self.local);
            return Ok(());
        }

        let provider = self
            .remote_scenes
            .get(&scene)
            .map(|info| info.provider)
            .ok_or(DistributionError::SceneNotFound(scene))?;
        if self.remote_subscriptions.remove(&scene) {
            self.inbound.remove(&(provider, scene));
            let message = DistributionMessage::Unsubscribe {
                scene,
                subscriber: self.local,
            };
            self.transport.send_message(provider, &message);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Remote participants
    // ---------------------------------------------------------------

    /// A participant became reachable
    ///
    /// Every scene published for remote use is announced to it.
    pub fn connect_participant(&mut self, participant: ParticipantId) {
        if participant == self.local || !self.peers.insert(participant) {
            return;
        }
        log::info!("{} connected", participant);

        for entry in self.scenes.values() {
            if entry.session.mode().is_some_and(|m| m.allows_remote()) {
                let message = DistributionMessage::SceneAvailable(entry.info.clone());
                self.transport.send_message(participant, &message);
            }
        }
    }

    /// A participant went away
    ///
    /// Its subscriptions end and the scenes it provided become unavailable.
    pub fn disconnect_participant(&mut self, participant: ParticipantId) {
        if !self.peers.remove(&participant) {
            return;
        }
        log::info!("{} disconnected", participant);

        for entry in self.scenes.values_mut() {
            entry.session.remove_subscriber(participant);
        }

        let provided: Vec<SceneId> = self
            .remote_scenes
            .values()
            .filter(|info| info.provider == participant)
            .map(|info| info.id)
            .collect();
        for scene in provided {
            self.drop_remote_scene(scene);
        }
        self.inbound.retain(|(from, _), _| *from != participant);
    }

    /// Process every envelope waiting in `receiver`, returning how many there were
    pub fn pump(&mut self, receiver: &Receiver<Envelope>) -> usize {
        let mut count = 0;
        while let Ok(envelope) = receiver.try_recv() {
            self.handle_bytes(envelope.from, &envelope.bytes);
            count += 1;
        }
        count
    }

    /// Decode and handle bytes received from a participant
    pub fn handle_bytes(&mut self, from: ParticipantId, bytes: &[u8]) {
        match DistributionMessage::decode(bytes) {
            Ok(message) => self.handle_message(from, message),
            Err(e) => {
                self.stats.messages_rejected += 1;
                log::warn!("Undecodable message from {}: {}", from, e);
            }
        }
    }

    /// Handle a message received from a participant
    pub fn handle_message(&mut self, from: ParticipantId, message: DistributionMessage) {
        log::trace!("{} from {} for {}", message.name(), from, message.scene());

        match message {
            DistributionMessage::SceneAvailable(info) => self.on_scene_available(from, info),
            DistributionMessage::SceneUnavailable { scene, provider } => {
                if provider != from || self.remote_provider(scene) != Some(from) {
                    self.reject(from, "SceneUnavailable", scene);
                    return;
                }
                self.drop_remote_scene(scene);
            }
            DistributionMessage::Subscribe { scene, subscriber } => {
                self.on_remote_subscribe(from, scene, subscriber);
            }
            DistributionMessage::Unsubscribe { scene, subscriber } => {
                match self.scenes.get_mut(&scene) {
                    Some(entry) if subscriber == from => {
                        entry.session.remove_subscriber(from);
                    }
                    _ => self.reject(from, "Unsubscribe", scene),
                }
            }
            DistributionMessage::UpdatePacket { scene, packet } => {
                self.on_update_packet(from, scene, &packet);
            }
        }
    }

    fn reject(&mut self, from: ParticipantId, what: &str, scene: SceneId) {
        self.stats.messages_rejected += 1;
        log::warn!("Rejected {} from {} for {}", what, from, scene);
    }

    fn remote_provider(&self, scene: SceneId) -> Option<ParticipantId> {
        self.remote_scenes.get(&scene).map(|info| info.provider)
    }

    fn on_scene_available(&mut self, from: ParticipantId, info: SceneInfo) {
        let scene = info.id;
        if info.provider != from || self.scenes.contains_key(&scene) {
            self.reject(from, "SceneAvailable", scene);
            return;
        }

        match self.remote_provider(scene) {
            Some(provider) if provider != from => {
                self.reject(from, "SceneAvailable", scene);
            }
            Some(_) => {
                // The provider restarted the scene; whatever we had is stale
                log::warn!("{} announced {} twice, resetting it", from, scene);
                self.drop_remote_scene(scene);
                self.remote_scenes.insert(scene, info.clone());
                self.renderer.on_scene_available(info);
            }
            None => {
                log::debug!("{} offers {} '{}'", from, scene, info.name);
                self.remote_scenes.insert(scene, info.clone());
                self.renderer.on_scene_available(info);
            }
        }
    }

    /// Forget a remote scene and tell the renderer
    fn drop_remote_scene(&mut self, scene: SceneId) {
        let Some(info) = self.remote_scenes.remove(&scene) else {
            return;
        };
        self.remote_subscriptions.remove(&scene);
        self.inbound.remove(&(info.provider, scene));
        self.renderer.on_scene_unavailable(scene);
        log::debug!("{} from {} is unavailable", scene, info.provider);
    }

    fn on_remote_subscribe(&mut self, from: ParticipantId, scene: SceneId, subscriber: ParticipantId) {
        let Some(entry) = self.scenes.get_mut(&scene) else {
            self.reject(from, "Subscribe", scene);
            return;
        };
        let remote_allowed = entry.session.mode().is_some_and(|m| m.allows_remote());
        if subscriber != from || !remote_allowed {
            self.reject(from, "Subscribe", scene);
            return;
        }

        match entry.session.add_subscriber(from) {
            Ok(dispatches) => {
                self.deliver(scene, dispatches);
            }
            Err(e) => {
                self.stats.messages_rejected += 1;
                log::warn!("Subscribe from {} for {} failed: {}", from, scene, e);
            }
        }
    }

    fn on_update_packet(&mut self, from: ParticipantId, scene: SceneId, packet: &[u8]) {
        if self.remote_provider(scene) != Some(from) {
            self.reject(from, "UpdatePacket", scene);
            return;
        }

        let stream = self.inbound.entry((from, scene)).or_default();
        let first = packet_sequence(packet) == Some(1);

        if stream.discarding {
            if !first {
                if Trailer::of_packet(packet) == Some(Trailer::Last) {
                    stream.discarding = false;
                }
                return;
            }
            stream.discarding = false;
        } else if first && stream.depacketizer.state() == DepacketizerState::Accumulating {
            // The sender gave up on the previous update
            self.stats.updates_dropped += 1;
            log::warn!("Incomplete update of {} from {} abandoned", scene, from);
            stream.depacketizer.reset();
        }

        match stream.depacketizer.process(packet) {
            DepacketizeResult::Empty => {}
            DepacketizeResult::HasData(update) => {
                self.stats.updates_received += 1;
                if self.remote_subscriptions.contains(&scene) {
                    self.stats.local_deliveries += 1;
                    self.renderer.apply(scene, update);
                } else {
                    log::debug!("Ignoring update of unsubscribed {}", scene);
                }
            }
            DepacketizeResult::Failed(e) => {
                self.stats.updates_dropped += 1;
                log::warn!("Dropped update of {} from {}: {}", scene, from, e);
                stream.depacketizer.reset();
                stream.discarding = Trailer::of_packet(packet) != Some(Trailer::Last);
            }
        }
    }

    // ---------------------------------------------------------------
    // Delivery
    // ---------------------------------------------------------------

    /// Carry out dispatches, returning whether any recipient was served
    fn deliver(&mut self, scene: SceneId, dispatches: Vec<Dispatch>) -> bool {
        let mut served = false;
        for dispatch in dispatches {
            log::trace!(
                "{} {} of {} to {:?}",
                if dispatch.snapshot { "Snapshot" } else { "Update" },
                dispatch.update.flush_counter(),
                scene,
                dispatch.recipients
            );
            served |= self.send_to(&dispatch.recipients, scene, dispatch.update);
        }
        served
    }

    /// Send `update` to every recipient, returning whether any of them got it
    ///
    /// Remote recipients get their packets first; the local renderer takes
    /// the update itself.
    fn send_to(&mut self, recipients: &[ParticipantId], scene: SceneId, update: SceneUpdate) -> bool {
        let mut local = false;
        let mut served = false;

        let remote: Vec<ParticipantId> = recipients
            .iter()
            .copied()
            .filter(|&id| {
                local |= id == self.local;
                id != self.local
            })
            .collect();

        if !remote.is_empty() {
            self.prepare_resources(&update);
            for recipient in remote {
                served |= self.send_remote(recipient, scene, &update);
            }
        }

        if local {
            self.stats.local_deliveries += 1;
            self.renderer.apply(scene, update);
            served = true;
        }
        served
    }

    /// Compress large resources once for all remote recipients
    fn prepare_resources(&self, update: &SceneUpdate) {
        for handle in &update.resources {
            if let Some(blob) = handle.blob() {
                if blob.decompressed_size() >= self.config.compression_threshold {
                    blob.compress();
                }
            }
        }
    }

    fn send_remote(&mut self, recipient: ParticipantId, scene: SceneId, update: &SceneUpdate) -> bool {
        let transport = &mut self.transport;
        let result = self.packetizer.packetize(update, &mut self.buffer, |packet| {
            let message = DistributionMessage::UpdatePacket {
                scene,
                packet: packet.to_vec(),
            };
            transport.send_message(recipient, &message)
        });

        match result {
            Ok(packets) => {
                self.stats.remote_updates_sent += 1;
                self.stats.packets_sent += u64::from(packets);
                true
            }
            Err(e) => {
                self.stats.send_failures += 1;
                log::error!("Failed to send {} to {}: {}", scene, recipient, e);
                false
            }
        }
    }
}
