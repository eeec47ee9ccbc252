use std::collections::HashMap;

use serde_json::Value;

use crate::broker::client::{ClientId, ClientState};
use crate::broker::job::{Job, JobId, JobState, Priority};
use crate::broker::queue::{PendingEntry, Queue};
use crate::protocol::{Request, Response};

/// A response the broker wants delivered to a specific client. A single
/// request can produce deliveries for several clients: a put that wakes a
/// blocked consumer yields the submitter's ack and the consumer's deferred
/// get response in one step.
pub type Delivery = (ClientId, Response);

/// The broker state machine.
///
/// Owns every table; performs no I/O. The transport layer feeds it one
/// request at a time and writes out whatever deliveries come back, which
/// keeps all state serialized without internal locking.
///
/// Non-owning references between tables are plain ids: queues hold
/// `(priority, id)` heap entries and waiter client ids, clients hold job
/// ids. Any id whose entry has left its table is treated as absent at the
/// point of use, which is what makes lazy deletion safe.
#[derive(Debug, Default)]
pub struct Broker {
    jobs: HashMap<JobId, Job>,
    queues: HashMap<String, Queue>,
    clients: HashMap<ClientId, ClientState>,
    next_job_id: JobId,
    next_client_id: ClientId,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return its client id.
    pub fn connect(&mut self) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(id, ClientState::new(id));
        id
    }

    /// Tear down a connection: leave every waiter list, then release each
    /// held job through the normal placement path, in ascending id order.
    pub fn disconnect(&mut self, client: ClientId) -> Vec<Delivery> {
        let Some(state) = self.clients.remove(&client) else {
            return Vec::new();
        };

        for name in &state.waiting_on {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.remove_waiter(client);
            }
        }

        if !state.working.is_empty() {
            tracing::debug!(
                client_id = client,
                jobs = state.working.len(),
                "Implicitly aborting jobs of disconnected client"
            );
        }

        let mut out = Vec::new();
        for id in state.working {
            if let Some(job) = self.jobs.get_mut(&id) {
                job.state = JobState::Pending;
                out.extend(self.place_job(id));
            }
        }
        out
    }

    /// Whether the client has a blocking get outstanding. The transport
    /// drops request lines from blocked clients.
    pub fn is_waiting(&self, client: ClientId) -> bool {
        self.clients
            .get(&client)
            .is_some_and(ClientState::is_waiting)
    }

    /// Handle one request to completion, including any wake-ups it causes.
    pub fn handle(&mut self, client: ClientId, request: Request) -> Vec<Delivery> {
        match request {
            Request::Put {
                queue,
                priority,
                payload,
            } => self.put(client, queue, priority, payload),
            Request::Get { queues, wait } => self.get(client, queues, wait),
            Request::Abort { id } => self.abort(client, id),
            Request::Delete { id } => self.delete(client, id),
        }
    }

    fn put(
        &mut self,
        client: ClientId,
        queue: String,
        priority: Priority,
        payload: Value,
    ) -> Vec<Delivery> {
        let id = self.next_job_id;
        self.next_job_id += 1;
        self.jobs
            .insert(id, Job::new(id, queue.clone(), payload, priority));
        tracing::debug!(
            client_id = client,
            job_id = id,
            queue = %queue,
            priority,
            "Job submitted"
        );

        let mut out = Vec::new();
        out.extend(self.place_job(id));
        out.push((client, Response::Submitted { id }));
        out
    }

    fn get(&mut self, client: ClientId, queues: Vec<String>, wait: bool) -> Vec<Delivery> {
        // Scan each named queue's live top and keep the globally highest
        // priority. Strictly-greater comparison makes ties resolve to the
        // earliest-listed queue.
        let mut best: Option<(PendingEntry, usize)> = None;
        for (index, name) in queues.iter().enumerate() {
            let Some(queue) = self.queues.get_mut(name) else {
                continue;
            };
            let Some(top) = queue.peek_live(&self.jobs) else {
                continue;
            };
            if best.map_or(true, |(entry, _)| top.priority > entry.priority) {
                best = Some((top, index));
            }
        }

        if let Some((entry, index)) = best {
            if let Some(queue) = self.queues.get_mut(&queues[index]) {
                queue.pop_top();
            }
            let response = self.assign(entry.id, client);
            vec![(client, response)]
        } else if wait {
            for name in &queues {
                self.ensure_queue(name).push_waiter(client);
            }
            if let Some(state) = self.clients.get_mut(&client) {
                state.waiting_on = queues;
            }
            tracing::debug!(client_id = client, "No job available, client now waiting");
            Vec::new()
        } else {
            vec![(client, Response::NoJob)]
        }
    }

    fn abort(&mut self, client: ClientId, id: i64) -> Vec<Delivery> {
        let Ok(id) = JobId::try_from(id) else {
            return vec![(client, Response::NoJob)];
        };
        let owns = self
            .clients
            .get(&client)
            .is_some_and(|state| state.working.contains(&id));
        if !owns {
            return vec![(client, Response::NoJob)];
        }

        if let Some(state) = self.clients.get_mut(&client) {
            state.working.remove(&id);
        }
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Pending;
        }
        tracing::debug!(client_id = client, job_id = id, "Job aborted");

        let mut out = Vec::new();
        out.extend(self.place_job(id));
        out.push((client, Response::Ok));
        out
    }

    fn delete(&mut self, client: ClientId, id: i64) -> Vec<Delivery> {
        let deleted = JobId::try_from(id)
            .ok()
            .and_then(|id| self.jobs.remove(&id));
        match deleted {
            Some(job) => {
                // A pending job leaves a tombstone in its queue's heap;
                // peek_live discards it when it surfaces.
                if let JobState::Assigned(owner) = job.state {
                    if let Some(state) = self.clients.get_mut(&owner) {
                        state.working.remove(&job.id);
                    }
                }
                tracing::debug!(client_id = client, job_id = job.id, "Job deleted");
                vec![(client, Response::Ok)]
            }
            None => vec![(client, Response::NoJob)],
        }
    }

    /// Place a pending job: hand it to the queue's first live waiter, else
    /// park it in the pending heap. Used by put and by every re-queue.
    fn place_job(&mut self, id: JobId) -> Option<Delivery> {
        let Some(job) = self.jobs.get(&id) else {
            return None;
        };
        let (queue_name, priority) = (job.queue.clone(), job.priority);
        self.ensure_queue(&queue_name);

        if let Some(waiter) = self.first_live_waiter(&queue_name) {
            self.detach_waiter(waiter);
            let response = self.assign(id, waiter);
            tracing::debug!(client_id = waiter, job_id = id, "Waking waiting client");
            Some((waiter, response))
        } else {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.push_pending(priority, id);
                tracing::debug!(job_id = id, queue = %queue.name, "Job parked as pending");
            }
            None
        }
    }

    /// First waiter of the queue that is still connected and still blocked
    /// on it; entries that are neither are dropped from the head.
    fn first_live_waiter(&mut self, queue_name: &str) -> Option<ClientId> {
        let queue = self.queues.get_mut(queue_name)?;
        while let Some(candidate) = queue.front_waiter() {
            let live = self
                .clients
                .get(&candidate)
                .is_some_and(|state| state.is_waiting_on(queue_name));
            if live {
                return Some(candidate);
            }
            queue.pop_front_waiter();
        }
        None
    }

    /// Remove a woken client from every waiter list it occupies and clear
    /// its waiting set. Must happen before its response is produced so the
    /// client's next request is handled as idle.
    fn detach_waiter(&mut self, client: ClientId) {
        let Some(state) = self.clients.get_mut(&client) else {
            return;
        };
        let waited_on = std::mem::take(&mut state.waiting_on);
        for name in waited_on {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.remove_waiter(client);
            }
        }
    }

    /// Transition a job to ASSIGNED and build the consumer's response.
    fn assign(&mut self, id: JobId, client: ClientId) -> Response {
        if let Some(state) = self.clients.get_mut(&client) {
            state.working.insert(id);
        }
        match self.jobs.get_mut(&id) {
            Some(job) => {
                job.state = JobState::Assigned(client);
                tracing::debug!(client_id = client, job_id = id, "Job assigned");
                Response::Assigned {
                    queue: job.queue.clone(),
                    priority: job.priority,
                    id: job.id,
                    payload: job.payload.clone(),
                }
            }
            None => Response::NoJob,
        }
    }

    fn ensure_queue(&mut self, name: &str) -> &mut Queue {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Queue::new(name.to_string()))
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientState> {
        self.clients.get(&id)
    }

    /// Number of live pending jobs in a queue (tombstones excluded).
    pub fn pending_count(&self, queue_name: &str) -> usize {
        self.queues
            .get(queue_name)
            .map(|queue| queue.live_pending(&self.jobs).len())
            .unwrap_or(0)
    }

    /// Number of waiter-list entries on a queue, stale ones included.
    pub fn waiting_count(&self, queue_name: &str) -> usize {
        self.queues
            .get(queue_name)
            .map(Queue::waiting_len)
            .unwrap_or(0)
    }
}
