use serde_json::Value;

use crate::broker::client::ClientId;

pub type JobId = u64;
pub type Priority = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in its queue for a consumer.
    Pending,
    /// Held by a client until deleted, aborted, or the client disconnects.
    Assigned(ClientId),
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Assigned(client) => write!(f, "assigned to client {}", client),
        }
    }
}

/// A unit of work. Exists iff its id is in the broker's job table; deletion
/// removes the entry, so a dangling id in any other structure means the job
/// is gone.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: Value,
    pub priority: Priority,
    pub state: JobState,
}

impl Job {
    pub fn new(id: JobId, queue: String, payload: Value, priority: Priority) -> Self {
        Self {
            id,
            queue,
            payload,
            priority,
            state: JobState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }

    pub fn owner(&self) -> Option<ClientId> {
        match self.state {
            JobState::Pending => None,
            JobState::Assigned(client) => Some(client),
        }
    }
}
