//! Per-conversation ordered message sequence.
//!
//! Two invariants hold after every operation:
//! - a message id appears at most once;
//! - `created_at` is non-decreasing from front to back.
//!
//! History pages are merged at the head, live inserts at the tail, and both
//! paths go through the same id check, so a message delivered by a page
//! fetch and by the live feed is kept once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parley_shared::{Message, MessageId};

#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Merge a page of history. Messages already present are skipped; the
    /// rest land at their chronological position (normally all before the
    /// current head). Returns how many were added.
    pub fn merge_page(&mut self, page: Vec<Message>) -> usize {
        let mut fresh: Vec<Message> = Vec::with_capacity(page.len());
        for message in page {
            if self.ids.insert(message.id) {
                fresh.push(message);
            }
        }
        if fresh.is_empty() {
            return 0;
        }
        fresh.sort_by_key(|m| m.created_at);
        let added = fresh.len();

        let fits_before_head = match (fresh.last(), self.messages.first()) {
            (Some(last_new), Some(head)) => last_new.created_at <= head.created_at,
            _ => true,
        };

        if fits_before_head {
            self.messages.splice(0..0, fresh);
        } else {
            let existing = std::mem::take(&mut self.messages);
            self.messages = merge_sorted(existing, fresh);
        }
        added
    }

    /// Add a live-delivered message. Returns `false` when the id is already
    /// present.
    pub fn append_live(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        let at = self.position_for(message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Replace a cached message with a newer version of the same id.
    /// Unknown ids are ignored. The embedded sender snapshot is kept when the
    /// update does not carry one.
    pub fn apply_update(&mut self, mut message: Message) -> bool {
        let Some(index) = self.index_of(message.id) else {
            return false;
        };

        let old = self.messages.remove(index);
        if message.sender.is_none() {
            message.sender = old.sender;
        }
        let at = self.position_for(message.created_at);
        self.messages.insert(at, message);
        true
    }

    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        if !self.ids.remove(&id) {
            return None;
        }
        let index = self.index_of(id)?;
        Some(self.messages.remove(index))
    }

    fn index_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().rposition(|m| m.id == id)
    }

    /// Index after every message created at or before `created_at`.
    fn position_for(&self, created_at: DateTime<Utc>) -> usize {
        match self.messages.last() {
            Some(last) if last.created_at <= created_at => self.messages.len(),
            _ => self
                .messages
                .partition_point(|m| m.created_at <= created_at),
        }
    }
}

/// Merge two chronologically sorted sequences; on equal timestamps the
/// message already in the log stays first.
fn merge_sorted(existing: Vec<Message>, fresh: Vec<Message>) -> Vec<Message> {
    let mut out = Vec::with_capacity(existing.len() + fresh.len());
    let mut a = existing.into_iter().peekable();
    let mut b = fresh.into_iter().peekable();
    loop {
        let take_fresh = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => y.created_at < x.created_at,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_fresh { b.next() } else { a.next() };
        out.extend(next);
    }
    out
}
