//! Delta logs - ordered graph-edit records
//!
//! The scene graph appends one record per edit. This crate never looks inside
//! a record; it only needs to append, copy, concatenate, clear and measure.

use serde::{Deserialize, Serialize};

/// Start of one record inside the log's data buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RecordHeader {
    kind: u32,
    offset: u64,
}

/// Borrowed view of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaEntry<'a> {
    /// Record kind as understood by the scene graph
    pub kind: u32,
    /// Record payload
    pub payload: &'a [u8],
}

/// Ordered, append-only log of graph-edit records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaLog {
    records: Vec<RecordHeader>,
    data: Vec<u8>,
}

impl DeltaLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty log with preallocated space
    pub fn with_capacity(records: usize, bytes: usize) -> Self {
        Self {
            records: Vec::with_capacity(records),
            data: Vec::with_capacity(bytes),
        }
    }

    /// Append one record
    pub fn append(&mut self, kind: u32, payload: &[u8]) {
        self.records.push(RecordHeader {
            kind,
            offset: self.data.len() as u64,
        });
        self.data.extend_from_slice(payload);
    }

    /// Append one record (builder pattern)
    pub fn with_record(mut self, kind: u32, payload: &[u8]) -> Self {
        self.append(kind, payload);
        self
    }

    /// Append every record of another log
    pub fn extend_from(&mut self, other: &DeltaLog) {
        let base = self.data.len() as u64;
        self.records.extend(other.records.iter().map(|r| RecordHeader {
            kind: r.kind,
            offset: base + r.offset,
        }));
        self.data.extend_from_slice(&other.data);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the log has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total payload bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Remove all records, keeping allocations
    pub fn clear(&mut self) {
        self.records.clear();
        self.data.clear();
    }

    /// Move the records out, leaving this log empty
    pub fn take(&mut self) -> DeltaLog {
        std::mem::take(self)
    }

    /// Get one record
    pub fn get(&self, index: usize) -> Option<DeltaEntry<'_>> {
        let header = self.records.get(index)?;
        let end = self
            .records
            .get(index + 1)
            .map_or(self.data.len() as u64, |next| next.offset);
        let payload = self.data.get(header.offset as usize..end as usize)?;
        Some(DeltaEntry {
            kind: header.kind,
            payload,
        })
    }

    /// Iterate over records in order
    pub fn iter(&self) -> impl Iterator<Item = DeltaEntry<'_>> + '_ {
        (0..self.records.len()).filter_map(move |i| self.get(i))
    }

    /// Check offsets are ordered and inside the data buffer
    ///
    /// Logs built with [`DeltaLog::append`] are always valid; logs decoded
    /// from the wire must be checked.
    pub fn is_well_formed(&self) -> bool {
        let mut previous = 0u64;
        for record in &self.records {
            if record.offset < previous || record.offset > self.data.len() as u64 {
                return false;
            }
            previous = record.offset;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_iterate() {
        let mut log = DeltaLog::new();
        log.append(1, &[10, 11]);
        log.append(2, &[]);
        log.append(3, &[30]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.byte_len(), 3);

        let entries: Vec<_> = log.iter().collect();
        assert_eq!(entries[0], DeltaEntry { kind: 1, payload: &[10, 11] });
        assert_eq!(entries[1], DeltaEntry { kind: 2, payload: &[] });
        assert_eq!(entries[2], DeltaEntry { kind: 3, payload: &[30] });
    }

    #[test]
    fn test_extend_from_rebases_offsets() {
        let mut first = DeltaLog::new().with_record(1, &[1, 1]);
        let second = DeltaLog::new().with_record(2, &[2]).with_record(3, &[3, 3, 3]);

        first.extend_from(&second);

        assert_eq!(first.len(), 3);
        assert_eq!(first.get(1).unwrap().payload, &[2]);
        assert_eq!(first.get(2).unwrap().payload, &[3, 3, 3]);
        assert!(first.is_well_formed());
    }

    #[test]
    fn test_take_and_clear() {
        let mut log = DeltaLog::new().with_record(7, &[7]);
        let taken = log.take();

        assert!(log.is_empty());
        assert_eq!(taken.len(), 1);

        let mut copy = taken.clone();
        copy.clear();
        assert!(copy.is_empty());
        assert_eq!(copy.byte_len(), 0);
        assert_eq!(taken.len(), 1);
    }

    #[test]
    fn test_malformed_offsets_detected() {
        let log = DeltaLog {
            records: vec![
                RecordHeader { kind: 1, offset: 2 },
                RecordHeader { kind: 2, offset: 1 },
            ],
            data: vec![0; 4],
        };
        assert!(!log.is_well_formed());

        let overflow = DeltaLog {
            records: vec![RecordHeader { kind: 1, offset: 9 }],
            data: vec![0; 4],
        };
        assert!(!overflow.is_well_formed());
        assert!(overflow.get(0).is_none());
    }
}
