//! Open stream accounting for one connection.

use std::collections::HashSet;

use crate::h2::frames::StreamId;

/// Streams currently open on a connection, plus the highest ID ever seen.
///
/// The last stream ID is what the final GOAWAY announces as the last stream
/// the server will still process.
#[derive(Debug, Clone, Default)]
pub struct OpenStreams {
    ids: HashSet<StreamId>,
    last_stream_id: StreamId,
}

impl OpenStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened stream.
    pub fn opened(&mut self, id: StreamId) {
        self.ids.insert(id);
        self.last_stream_id = self.last_stream_id.max(id);
    }

    /// Remove `id`. Returns `true` if this emptied the set.
    pub fn closed(&mut self, id: StreamId) -> bool {
        self.ids.remove(&id) && self.ids.is_empty()
    }

    /// Whether no stream is open.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of open streams.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Highest stream ID opened so far.
    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_last_stream_id() {
        let mut streams = OpenStreams::new();
        streams.opened(StreamId::new(3));
        streams.opened(StreamId::new(1));
        assert_eq!(streams.last_stream_id(), StreamId::new(3));
        assert_eq!(streams.len(), 2);
    }

    #[test]
    fn only_the_last_close_empties() {
        let mut streams = OpenStreams::new();
        streams.opened(StreamId::new(1));
        streams.opened(StreamId::new(3));

        assert!(!streams.closed(StreamId::new(1)));
        assert!(streams.closed(StreamId::new(3)));
        // Closing an unknown stream is not a transition.
        assert!(!streams.closed(StreamId::new(5)));
        assert_eq!(streams.last_stream_id(), StreamId::new(3));
    }
}
