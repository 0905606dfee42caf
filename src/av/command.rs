use std::collections::VecDeque;

use super::TrackId;
use crate::error::{FlowError, Result};

/// Readiness signals a stage publishes about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Producer has a frame ready.
    HasData,
    /// Consumer has room for a frame.
    NeedData,
    /// Consumer cannot accept data before it knows the format.
    NeedInputFormat,
    /// Producer's output format changed.
    OutputFormatChanged,
    /// Producer reached end of stream.
    EndOfFile,
    /// Scheduling hint: move on to the next pair.
    NextPair,
}

/// Ordered per-stage queue of `(command, track)` entries.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    queue: VecDeque<(Command, TrackId)>,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command. `EndOfFile` discards every pending readiness
    /// command; end-of-file entries of other tracks stay queued.
    pub fn queue(&mut self, command: Command, track_id: TrackId) {
        if command == Command::EndOfFile {
            self.queue.retain(|(pending, _)| *pending == Command::EndOfFile);
        }
        self.queue.push_back((command, track_id));
    }

    /// Removes the head entry.
    pub fn dequeue(&mut self) -> Result<(Command, TrackId)> {
        self.queue.pop_front().ok_or(FlowError::EmptyQueue)
    }

    /// Head entry, if any.
    pub fn first(&self) -> Option<(Command, TrackId)> {
        self.queue.front().copied()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Entries from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &(Command, TrackId)> {
        self.queue.iter()
    }

    /// Whether any entry carries `command`.
    pub fn contains(&self, command: Command) -> bool {
        self.queue.iter().any(|(c, _)| *c == command)
    }
}
