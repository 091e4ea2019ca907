//! Handler registry mapping request IDs to pending reply handlers.
//!
//! The registry is owned by a [`Client`](crate::Client). Entries are only
//! removed explicitly: by the handler itself once its exchange is complete,
//! or by the caller abandoning the exchange. The registry never expires
//! entries on its own; each entry records when it was registered so the
//! layer holding the [`HandlerToken`] can enforce a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{HseError, Result};
use crate::response::ResponseHeader;

/// Callback invoked for every datagram matching a registered request ID.
///
/// It receives the decoded header and the payload. The payload borrows the
/// session's receive buffer and is only valid for the duration of the call.
pub type ReplyHandler = Arc<dyn Fn(&ResponseHeader, &[u8]) + Send + Sync>;

/// Identifies one registration.
///
/// Tokens carry a generation so that a stale token never removes a newer
/// handler registered under the same (wrapped) request ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken {
    request_id: u8,
    generation: u64,
}

impl HandlerToken {
    /// Request ID this token was registered under.
    pub fn request_id(&self) -> u8 {
        self.request_id
    }
}

struct HandlerEntry {
    generation: u64,
    registered_at: Instant,
    on_reply: ReplyHandler,
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    entries: HashMap<u8, HandlerEntry>,
    next_generation: u64,
}

impl HandlerRegistry {
    /// Allocates the token the next successful insert under `request_id` will get.
    pub(crate) fn reserve(&mut self, request_id: u8) -> Result<HandlerToken> {
        if self.entries.contains_key(&request_id) {
            return Err(HseError::DuplicateRequestId { request_id });
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        Ok(HandlerToken {
            request_id,
            generation,
        })
    }

    /// Inserts a handler under a token obtained from [`reserve`](Self::reserve).
    pub(crate) fn insert(&mut self, token: HandlerToken, on_reply: ReplyHandler) -> Result<()> {
        if self.entries.contains_key(&token.request_id) {
            return Err(HseError::DuplicateRequestId {
                request_id: token.request_id,
            });
        }
        self.entries.insert(
            token.request_id,
            HandlerEntry {
                generation: token.generation,
                registered_at: Instant::now(),
                on_reply,
            },
        );
        Ok(())
    }

    pub(crate) fn remove(&mut self, token: HandlerToken) -> bool {
        match self.entries.get(&token.request_id) {
            Some(entry) if entry.generation == token.generation => {
                self.entries.remove(&token.request_id);
                true
            }
            _ => false,
        }
    }

    /// Returns an owned handle to the handler for `request_id`.
    pub(crate) fn handler(&self, request_id: u8) -> Option<ReplyHandler> {
        self.entries
            .get(&request_id)
            .map(|entry| Arc::clone(&entry.on_reply))
    }

    pub(crate) fn registered_at(&self, token: HandlerToken) -> Option<Instant> {
        self.entries
            .get(&token.request_id)
            .filter(|entry| entry.generation == token.generation)
            .map(|entry| entry.registered_at)
    }

    pub(crate) fn request_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every entry, handing the handlers back so they can be dropped
    /// outside of any lock.
    pub(crate) fn drain(&mut self) -> Vec<ReplyHandler> {
        self.entries
            .drain()
            .map(|(_, entry)| entry.on_reply)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("request_ids", &self.request_ids())
            .finish()
    }
}
