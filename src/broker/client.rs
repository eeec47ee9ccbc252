use std::collections::BTreeSet;

use crate::broker::job::JobId;

pub type ClientId = u64;

/// Per-connection broker-side state.
///
/// A client is idle when `waiting_on` is empty, blocked otherwise. Blocked
/// clients may not issue requests; the only events that affect them are a
/// matching job placement or their own disconnect.
#[derive(Debug, Default)]
pub struct ClientState {
    pub id: ClientId,
    /// Jobs currently assigned to this client. Ordered so that an implicit
    /// abort on disconnect releases jobs in ascending id order.
    pub working: BTreeSet<JobId>,
    /// Queue names of the outstanding blocking get, in request order,
    /// duplicates preserved as sent.
    pub waiting_on: Vec<String>,
}

impl ClientState {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_waiting(&self) -> bool {
        !self.waiting_on.is_empty()
    }

    pub fn is_waiting_on(&self, queue: &str) -> bool {
        self.waiting_on.iter().any(|name| name == queue)
    }
}
