//! Block-chunked event list
//!
//! Entries live inside fixed-capacity blocks chained in a deque. Appending
//! fills the back block and chains a new one when full; draining unloads
//! entries one at a time from the front and frees the block once every slot
//! in it has been unloaded. Entry payloads are owned by their slot and are
//! never moved between blocks.

use crate::events::EventLogEntry;
use std::collections::VecDeque;

/// Entries per block
pub const BLOCK_CAPACITY: usize = 512;

#[derive(Debug)]
struct Block {
    slots: Vec<Option<EventLogEntry>>,
    drained: usize,
}

impl Block {
    fn new() -> Self {
        Self {
            slots: Vec::with_capacity(BLOCK_CAPACITY),
            drained: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.slots.len() == BLOCK_CAPACITY
    }

    fn is_exhausted(&self) -> bool {
        self.is_full() && self.drained == self.slots.len()
    }
}

/// Chunked list of log entries
#[derive(Debug, Default)]
pub struct TtEventList {
    blocks: VecDeque<Block>,
    len: usize,
}

impl TtEventList {
    /// Empty list with no blocks
    pub fn new() -> Self {
        Self {
            blocks: VecDeque::new(),
            len: 0,
        }
    }

    /// Number of live (not yet drained) entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no live entries remain
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of allocated blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append an entry at the back
    pub fn push(&mut self, entry: EventLogEntry) {
        let needs_block = match self.blocks.back() {
            Some(block) => block.is_full(),
            None => true,
        };
        if needs_block {
            self.blocks.push_back(Block::new());
        }
        if let Some(block) = self.blocks.back_mut() {
            block.slots.push(Some(entry));
            self.len += 1;
        }
    }

    /// Unload the oldest live entry; its block is freed once fully drained
    pub fn pop_front(&mut self) -> Option<EventLogEntry> {
        let block = self.blocks.front_mut()?;
        if block.drained == block.slots.len() {
            // everything drained and the block is still filling at the back
            return None;
        }
        let idx = block.drained;
        block.drained += 1;
        let entry = block.slots[idx].take();
        if block.is_exhausted() {
            self.blocks.pop_front();
        }
        self.len -= 1;
        entry
    }

    /// Iterate live entries oldest-first; reversible for backward scans
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &EventLogEntry> {
        self.blocks
            .iter()
            .flat_map(|b| b.slots.iter().filter_map(|slot| slot.as_ref()))
    }

    /// The newest live entry
    pub fn back(&self) -> Option<&EventLogEntry> {
        self.iter().next_back()
    }

    /// The oldest live entry
    pub fn front(&self) -> Option<&EventLogEntry> {
        self.iter().next()
    }

    /// Newest-first search returning a mutable entry. Completion walks from
    /// the back because tokens are almost always completed immediately.
    pub fn rfind_mut<P>(&mut self, mut pred: P) -> Option<&mut EventLogEntry>
    where
        P: FnMut(&EventLogEntry) -> bool,
    {
        self.blocks
            .iter_mut()
            .rev()
            .flat_map(|b| b.slots.iter_mut().rev())
            .filter_map(|slot| slot.as_mut())
            .find(|entry| pred(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;

    fn entry(t: i64) -> EventLogEntry {
        EventLogEntry::completed(t, EventPayload::EventLoopYieldPoint)
    }

    #[test]
    fn test_push_chains_blocks() {
        let mut list = TtEventList::new();
        for t in 0..(BLOCK_CAPACITY as i64 * 2 + 1) {
            list.push(entry(t));
        }
        assert_eq!(list.len(), BLOCK_CAPACITY * 2 + 1);
        assert_eq!(list.block_count(), 3);
    }

    #[test]
    fn test_pop_front_frees_drained_blocks() {
        let mut list = TtEventList::new();
        for t in 0..(BLOCK_CAPACITY as i64 + 10) {
            list.push(entry(t));
        }
        for expected in 0..BLOCK_CAPACITY as i64 {
            assert_eq!(list.pop_front().map(|e| e.event_time), Some(expected));
        }
        assert_eq!(list.block_count(), 1);
        assert_eq!(list.len(), 10);
        assert_eq!(list.front().map(|e| e.event_time), Some(BLOCK_CAPACITY as i64));
    }

    #[test]
    fn test_pop_front_empty() {
        let mut list = TtEventList::new();
        assert!(list.pop_front().is_none());
        list.push(entry(1));
        assert_eq!(list.pop_front().map(|e| e.event_time), Some(1));
        assert!(list.pop_front().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_iter_is_double_ended() {
        let mut list = TtEventList::new();
        for t in 1..=5 {
            list.push(entry(t));
        }
        let forward: Vec<i64> = list.iter().map(|e| e.event_time).collect();
        let backward: Vec<i64> = list.iter().rev().map(|e| e.event_time).collect();
        assert_eq!(forward, vec![1, 2, 3, 4, 5]);
        assert_eq!(backward, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_iter_skips_drained_entries() {
        let mut list = TtEventList::new();
        for t in 1..=4 {
            list.push(entry(t));
        }
        list.pop_front();
        list.pop_front();
        let remaining: Vec<i64> = list.iter().map(|e| e.event_time).collect();
        assert_eq!(remaining, vec![3, 4]);
        assert_eq!(list.back().map(|e| e.event_time), Some(4));
    }

    #[test]
    fn test_rfind_mut_finds_newest_match() {
        let mut list = TtEventList::new();
        for t in 1..=6 {
            list.push(entry(t));
        }
        let found = list.rfind_mut(|e| e.event_time % 2 == 0);
        assert_eq!(found.map(|e| e.event_time), Some(6));
    }
}
