//! Streams: append-only logs keyed by `ms-seq` ids, plus consumer groups
//! tracking delivered-but-unacknowledged entries.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum StreamError {
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    IdTooSmall,
    #[error("The stream has exhausted the last possible ID, unable to add more items")]
    IdExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// The smallest id strictly greater than this one.
    pub fn successor(self) -> Option<StreamId> {
        if self.seq < u64::MAX {
            Some(StreamId::new(self.ms, self.seq + 1))
        } else if self.ms < u64::MAX {
            Some(StreamId::new(self.ms + 1, 0))
        } else {
            None
        }
    }

    /// Parses `ms` or `ms-seq`. A missing sequence takes `default_seq`,
    /// which lets range starts default to 0 and range ends to the maximum.
    pub fn parse(token: &[u8], default_seq: u64) -> Option<StreamId> {
        let text = std::str::from_utf8(token).ok()?;
        match text.split_once('-') {
            Some((ms, seq)) => Some(StreamId::new(ms.parse().ok()?, seq.parse().ok()?)),
            None => Some(StreamId::new(text.parse().ok()?, default_seq)),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// The id portion of an XADD request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddId {
    /// `*`: current time, next sequence.
    Auto,
    /// `ms-*`: explicit milliseconds, auto sequence.
    AutoSequence(u64),
    /// `ms-seq` or bare `ms`.
    Explicit(StreamId),
}

impl AddId {
    pub fn parse(token: &[u8]) -> Option<AddId> {
        if token == b"*" {
            return Some(AddId::Auto);
        }
        let text = std::str::from_utf8(token).ok()?;
        if let Some((ms, seq)) = text.split_once('-') {
            if seq == "*" {
                return Some(AddId::AutoSequence(ms.parse().ok()?));
            }
            return Some(AddId::Explicit(StreamId::new(
                ms.parse().ok()?,
                seq.parse().ok()?,
            )));
        }
        Some(AddId::Explicit(StreamId::new(text.parse().ok()?, 0)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub consumer: Bytes,
    pub delivery_time_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub pending: BTreeMap<StreamId, PendingEntry>,
    /// Consumer name → last-seen wall clock.
    pub consumers: HashMap<Bytes, u64>,
}

impl ConsumerGroup {
    pub fn new(last_delivered: StreamId) -> Self {
        ConsumerGroup {
            last_delivered,
            pending: BTreeMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// Pending entries owned by one consumer, oldest first.
    pub fn pending_for_consumer(&self, consumer: &[u8]) -> Vec<StreamId> {
        self.pending
            .iter()
            .filter(|(_, entry)| entry.consumer == consumer)
            .map(|(&id, _)| id)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    entries: BTreeMap<StreamId, Vec<(Bytes, Bytes)>>,
    pub last_id: StreamId,
    pub max_deleted_id: StreamId,
    pub entries_added: u64,
    pub groups: HashMap<Bytes, ConsumerGroup>,
}

impl Stream {
    pub fn new() -> Self {
        Stream::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry. Explicit ids must be strictly greater than
    /// `last_id`; `0-0` is never a valid entry id.
    pub fn add(
        &mut self,
        id: AddId,
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamId, StreamError> {
        let id = match id {
            AddId::Auto => {
                if now_ms > self.last_id.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    self.last_id.successor().ok_or(StreamError::IdExhausted)?
                }
            }
            AddId::AutoSequence(ms) => {
                if ms > self.last_id.ms {
                    StreamId::new(ms, 0)
                } else if ms == self.last_id.ms {
                    self.last_id.successor().ok_or(StreamError::IdExhausted)?
                } else {
                    return Err(StreamError::IdTooSmall);
                }
            }
            AddId::Explicit(id) => {
                if id <= self.last_id || id == StreamId::MIN {
                    return Err(StreamError::IdTooSmall);
                }
                id
            }
        };

        self.entries.insert(id, fields);
        self.last_id = id;
        self.entries_added += 1;
        Ok(id)
    }

    pub fn get(&self, id: &StreamId) -> Option<&Vec<(Bytes, Bytes)>> {
        self.entries.get(id)
    }

    pub fn delete(&mut self, id: &StreamId) -> bool {
        if self.entries.remove(id).is_some() {
            if *id > self.max_deleted_id {
                self.max_deleted_id = *id;
            }
            true
        } else {
            false
        }
    }

    /// Inclusive id range in either direction, optionally excluding the
    /// boundary entries (the `(id` form).
    #[allow(clippy::too_many_arguments)]
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
        start_exclusive: bool,
        end_exclusive: bool,
        reverse: bool,
        count: Option<usize>,
    ) -> Vec<(StreamId, Vec<(Bytes, Bytes)>)> {
        let low = if start_exclusive {
            match start.successor() {
                Some(id) => id,
                None => return Vec::new(),
            }
        } else {
            start
        };

        let selected = self
            .entries
            .range(low..=end)
            .filter(|(id, _)| !(end_exclusive && **id == end))
            .map(|(id, fields)| (*id, fields.clone()));

        if reverse {
            let mut all: Vec<_> = selected.collect();
            all.reverse();
            all.truncate(count.unwrap_or(usize::MAX));
            all
        } else {
            selected.take(count.unwrap_or(usize::MAX)).collect()
        }
    }

    /// Entries strictly after `id` (the XREAD contract).
    pub fn entries_after(
        &self,
        id: StreamId,
        count: Option<usize>,
    ) -> Vec<(StreamId, Vec<(Bytes, Bytes)>)> {
        let Some(low) = id.successor() else {
            return Vec::new();
        };
        self.entries
            .range(low..)
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(Bytes, Bytes)> {
        pairs
            .iter()
            .map(|(field, value)| (Bytes::copy_from_slice(field.as_bytes()), Bytes::copy_from_slice(value.as_bytes())))
            .collect()
    }

    #[test]
    fn test_stream_id_parse() {
        let test_cases = vec![
            (&b"1526919030484-3"[..], 0, Some(StreamId::new(1526919030484, 3))),
            (b"1526919030484", 0, Some(StreamId::new(1526919030484, 0))),
            (b"5", u64::MAX, Some(StreamId::new(5, u64::MAX))),
            (b"abc", 0, None),
            (b"1-abc", 0, None),
        ];

        for (token, default_seq, expected) in test_cases {
            assert_eq!(
                StreamId::parse(token, default_seq),
                expected,
                "parsing {:?}",
                String::from_utf8_lossy(token)
            );
        }
    }

    #[test]
    fn test_add_id_parse() {
        assert_eq!(AddId::parse(b"*"), Some(AddId::Auto));
        assert_eq!(AddId::parse(b"5-*"), Some(AddId::AutoSequence(5)));
        assert_eq!(
            AddId::parse(b"5-1"),
            Some(AddId::Explicit(StreamId::new(5, 1)))
        );
        assert_eq!(AddId::parse(b"5"), Some(AddId::Explicit(StreamId::new(5, 0))));
        assert_eq!(AddId::parse(b"x-*"), None);
    }

    #[test]
    fn test_add_rejects_non_increasing_ids() {
        let mut stream = Stream::new();
        stream
            .add(AddId::Explicit(StreamId::new(5, 5)), fields(&[("a", "1")]), 0)
            .unwrap();

        for id in [StreamId::new(5, 5), StreamId::new(5, 4), StreamId::new(4, 9)] {
            assert_eq!(
                stream.add(AddId::Explicit(id), fields(&[("a", "1")]), 0),
                Err(StreamError::IdTooSmall),
                "id {} must be rejected",
                id
            );
        }

        assert_eq!(
            stream.add(AddId::Explicit(StreamId::MIN), fields(&[("a", "1")]), 0),
            Err(StreamError::IdTooSmall)
        );
    }

    #[test]
    fn test_add_auto_sequence() {
        let mut stream = Stream::new();

        let first = stream.add(AddId::AutoSequence(7), fields(&[("a", "1")]), 0).unwrap();
        assert_eq!(first, StreamId::new(7, 0));

        let second = stream.add(AddId::AutoSequence(7), fields(&[("a", "2")]), 0).unwrap();
        assert_eq!(second, StreamId::new(7, 1));

        assert_eq!(
            stream.add(AddId::AutoSequence(6), fields(&[("a", "3")]), 0),
            Err(StreamError::IdTooSmall)
        );
    }

    #[test]
    fn test_add_auto_uses_clock_when_ahead() {
        let mut stream = Stream::new();

        let first = stream.add(AddId::Auto, fields(&[("a", "1")]), 100).unwrap();
        assert_eq!(first, StreamId::new(100, 0));

        // Clock went backwards: fall back to last id + 1.
        let second = stream.add(AddId::Auto, fields(&[("a", "2")]), 50).unwrap();
        assert_eq!(second, StreamId::new(100, 1));
    }

    #[test]
    fn test_range_directions_and_exclusive_bounds() {
        let mut stream = Stream::new();
        for ms in 1..=4u64 {
            stream
                .add(AddId::Explicit(StreamId::new(ms, 0)), fields(&[("n", "x")]), 0)
                .unwrap();
        }

        let forward = stream.range(StreamId::MIN, StreamId::MAX, false, false, false, None);
        let ids: Vec<_> = forward.iter().map(|(id, _)| id.ms).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let reverse = stream.range(StreamId::MIN, StreamId::MAX, false, false, true, Some(2));
        let ids: Vec<_> = reverse.iter().map(|(id, _)| id.ms).collect();
        assert_eq!(ids, vec![4, 3]);

        let exclusive = stream.range(
            StreamId::new(1, 0),
            StreamId::new(4, 0),
            true,
            true,
            false,
            None,
        );
        let ids: Vec<_> = exclusive.iter().map(|(id, _)| id.ms).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_entries_after() {
        let mut stream = Stream::new();
        for ms in 1..=3u64 {
            stream
                .add(AddId::Explicit(StreamId::new(ms, 0)), fields(&[("n", "x")]), 0)
                .unwrap();
        }

        let after = stream.entries_after(StreamId::new(1, 0), None);
        let ids: Vec<_> = after.iter().map(|(id, _)| id.ms).collect();
        assert_eq!(ids, vec![2, 3]);

        assert!(stream.entries_after(StreamId::new(3, 0), None).is_empty());
    }

    #[test]
    fn test_delete_tracks_max_deleted() {
        let mut stream = Stream::new();
        let id = stream.add(AddId::Explicit(StreamId::new(9, 0)), fields(&[("a", "1")]), 0).unwrap();

        assert!(stream.delete(&id));
        assert!(!stream.delete(&id));
        assert_eq!(stream.max_deleted_id, id);
        assert!(stream.is_empty());
        // The stream object survives with its last_id intact.
        assert_eq!(stream.last_id, id);
    }
}
