//! Scene updates - the unit of transfer between participants

use crate::delta::DeltaLog;
use crate::flush::FlushInfo;
use void_resource::{ContentHash, ResourceHandle};

/// Delta log, resources and envelope of one flush for one recipient
///
/// Delivered to local renderers by move. Remote recipients get a packetized
/// copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneUpdate {
    /// Graph edits in order
    pub actions: DeltaLog,
    /// Blobs the recipient does not have yet
    pub resources: Vec<ResourceHandle>,
    /// Consistency envelope
    pub flush_info: FlushInfo,
}

impl SceneUpdate {
    /// Create an update
    pub fn new(actions: DeltaLog, resources: Vec<ResourceHandle>, flush_info: FlushInfo) -> Self {
        Self {
            actions,
            resources,
            flush_info,
        }
    }

    /// Hashes of the carried resources in list order
    pub fn resource_hashes(&self) -> Vec<ContentHash> {
        self.resources.iter().map(ResourceHandle::hash).collect()
    }

    /// Check if the update changes nothing besides timing
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.resources.is_empty() && !self.flush_info.has_changes()
    }

    /// Flush number
    pub fn flush_counter(&self) -> u64 {
        self.flush_info.flush_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush::TimeInfo;
    use void_resource::{Blob, ResourceKind};

    #[test]
    fn test_empty_update() {
        let update = SceneUpdate::new(DeltaLog::new(), Vec::new(), FlushInfo::new(4, TimeInfo::new(1)));
        assert!(update.is_empty());
        assert_eq!(update.flush_counter(), 4);
    }

    #[test]
    fn test_resource_hashes_in_order() {
        let a = ResourceHandle::detached(Blob::new(ResourceKind::Texture2D, "a", vec![1]));
        let b = ResourceHandle::detached(Blob::new(ResourceKind::Texture2D, "b", vec![2]));
        let expected = vec![a.hash(), b.hash()];

        let update = SceneUpdate::new(DeltaLog::new(), vec![a, b], FlushInfo::default());
        assert_eq!(update.resource_hashes(), expected);
        assert!(!update.is_empty());
    }
}
