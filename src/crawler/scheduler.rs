//! Task frontier and dispatch scheduling
//!
//! This module handles:
//! - Admission of submitted tasks through the checkpoint ledger
//! - The priority queue of admitted tasks (priority first, FIFO within a tier)
//! - Per-host request spacing, independent of the worker count

use crate::ledger::{AdmitDecision, Ledger};
use crate::state::HostState;
use crate::storage::StorageResult;
use crate::task::{Task, TaskIdentity};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

/// A task waiting in the frontier
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: Task,

    /// Destination host, for request spacing
    pub host: String,

    /// Arrival order, breaks ties within a priority tier
    pub seq: u64,
}

// Higher priority first, then earlier arrival
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

/// What the dispatch loop should do next
#[derive(Debug)]
pub enum Dispatch {
    /// Fetch this task now
    Ready(Task),

    /// Every queued task's host is still cooling down
    Wait(Duration),

    /// Nothing is queued
    Empty,
}

/// Priority-ordered set of admitted, not-yet-dispatched tasks
///
/// Every submitted task goes through `Ledger::admit` first. An identity is
/// queued at most once per run: a resubmission while the first copy is
/// queued or in flight is dropped without touching the ledger, and a task
/// that failed this run waits for the next run to be retried.
pub struct Frontier {
    ledger: Ledger,
    queue: BinaryHeap<QueuedTask>,
    seen: HashSet<TaskIdentity>,
    host_states: HashMap<String, HostState>,
    request_delay: Duration,
    next_seq: u64,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `ledger` - The checkpoint ledger consulted on every submission
    /// * `request_delay` - Minimum spacing between requests to one host
    pub fn new(ledger: Ledger, request_delay: Duration) -> Self {
        Self {
            ledger,
            queue: BinaryHeap::new(),
            seen: HashSet::new(),
            host_states: HashMap::new(),
            request_delay,
            next_seq: 0,
        }
    }

    /// Submits a task, queueing it if the ledger admits it
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The task was queued
    /// * `Ok(false)` - Already queued this run, or finished earlier
    /// * `Err(StorageError)` - The ledger could not be consulted (fatal)
    pub fn submit(&mut self, task: Task) -> StorageResult<bool> {
        if self.seen.contains(&task.identity) {
            tracing::trace!("{} already submitted this run", task.identity);
            return Ok(false);
        }

        let decision = self.ledger.admit(&task)?;
        self.seen.insert(task.identity.clone());

        match decision {
            AdmitDecision::Proceed => {
                self.push(task);
                Ok(true)
            }
            AdmitDecision::Skip => Ok(false),
        }
    }

    /// Submits several tasks, returning how many were queued
    pub fn submit_all(&mut self, tasks: impl IntoIterator<Item = Task>) -> StorageResult<usize> {
        let mut queued = 0;
        for task in tasks {
            if self.submit(task)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    fn push(&mut self, task: Task) {
        let host = task.host();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedTask { task, host, seq });
    }

    /// Picks the highest-priority task whose host can take a request now
    ///
    /// Tasks are examined in priority order; those whose host is still
    /// within the request delay are put back untouched. The chosen task's
    /// host is charged with a request at `now`.
    pub fn poll(&mut self, now: Instant) -> Dispatch {
        if self.queue.is_empty() {
            return Dispatch::Empty;
        }

        let mut not_ready = Vec::new();
        let mut found = None;

        while let Some(queued) = self.queue.pop() {
            let state = self
                .host_states
                .entry(queued.host.clone())
                .or_insert_with(HostState::new);

            if state.can_request(self.request_delay, now) {
                state.record_request(now);
                found = Some(queued);
                break;
            }
            not_ready.push(queued);
        }

        let wait = self.minimum_wait(&not_ready, now);
        self.queue.extend(not_ready);

        match found {
            Some(queued) => {
                tracing::debug!(
                    "Dispatching {} (priority {})",
                    queued.task.identity,
                    queued.task.priority
                );
                Dispatch::Ready(queued.task)
            }
            None => Dispatch::Wait(wait),
        }
    }

    /// Time until the first of the given tasks' hosts is ready again
    fn minimum_wait(&self, waiting: &[QueuedTask], now: Instant) -> Duration {
        waiting
            .iter()
            .filter_map(|queued| {
                self.host_states
                    .get(&queued.host)
                    .and_then(|state| state.time_until_next_request(self.request_delay, now))
            })
            .min()
            .unwrap_or(Duration::ZERO)
            + Duration::from_millis(1)
    }

    /// Returns the number of queued tasks
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns whether the frontier is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Gets the request spacing state of a host
    pub fn host_state(&self, host: &str) -> Option<&HostState> {
        self.host_states.get(host)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, SqliteStorage};
    use crate::task::{Stage, TaskContext, TIER_BASE, TIER_HIGH, TIER_MID, TIER_TOP};
    use url::Url;

    fn frontier(delay_ms: u64) -> Frontier {
        let ledger = Ledger::new(shared(SqliteStorage::new_in_memory().unwrap()), 5);
        Frontier::new(ledger, Duration::from_millis(delay_ms))
    }

    fn task(path: &str, priority: i32) -> Task {
        Task::new(
            Stage::Listing,
            Url::parse(&format!("http://example.com{}", path)).unwrap(),
            TaskContext::new(),
        )
        .with_priority(priority)
    }

    fn drain(frontier: &mut Frontier) -> Vec<String> {
        let mut order = Vec::new();
        while let Dispatch::Ready(task) = frontier.poll(Instant::now()) {
            order.push(task.url.path().to_string());
        }
        order
    }

    #[test]
    fn test_new_frontier_is_empty() {
        let mut frontier = frontier(0);
        assert!(frontier.is_empty());
        assert!(matches!(frontier.poll(Instant::now()), Dispatch::Empty));
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut frontier = frontier(0);
        frontier.submit(task("/low", TIER_BASE)).unwrap();
        frontier.submit(task("/mid-1", TIER_MID)).unwrap();
        frontier.submit(task("/top", TIER_TOP)).unwrap();
        frontier.submit(task("/mid-2", TIER_MID)).unwrap();
        frontier.submit(task("/high", TIER_HIGH)).unwrap();

        assert_eq!(
            drain(&mut frontier),
            vec!["/top", "/high", "/mid-1", "/mid-2", "/low"]
        );
    }

    #[test]
    fn test_resubmission_is_dropped() {
        let mut frontier = frontier(0);
        assert!(frontier.submit(task("/a", TIER_MID)).unwrap());
        assert!(!frontier.submit(task("/a", TIER_TOP)).unwrap());
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_finished_task_not_queued() {
        let mut frontier = frontier(0);
        let done = task("/done", TIER_MID);
        frontier.ledger().admit(&done).unwrap();
        frontier.ledger().complete(&done).unwrap();

        assert!(!frontier.submit(done).unwrap());
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_submit_all_counts_queued() {
        let mut frontier = frontier(0);
        let queued = frontier
            .submit_all(vec![task("/a", 0), task("/b", 0), task("/a", 0)])
            .unwrap();
        assert_eq!(queued, 2);
    }

    #[test]
    fn test_host_spacing() {
        let mut frontier = frontier(60_000);
        frontier.submit(task("/a", TIER_TOP)).unwrap();
        frontier.submit(task("/b", TIER_TOP)).unwrap();

        let now = Instant::now();
        assert!(matches!(frontier.poll(now), Dispatch::Ready(_)));

        match frontier.poll(now) {
            Dispatch::Wait(wait) => assert!(wait > Duration::from_secs(59)),
            other => panic!("expected wait, got {:?}", other),
        }
        assert_eq!(frontier.len(), 1);
        assert_eq!(
            frontier.host_state("example.com").unwrap().request_count,
            1
        );
    }

    #[test]
    fn test_other_host_dispatches_while_one_cools_down() {
        let mut frontier = frontier(60_000);
        frontier.submit(task("/a", TIER_TOP)).unwrap();
        frontier.submit(task("/b", TIER_TOP)).unwrap();
        frontier
            .submit(Task::new(
                Stage::Listing,
                Url::parse("http://other.example.org/c").unwrap(),
                TaskContext::new(),
            ).with_priority(TIER_BASE))
            .unwrap();

        let now = Instant::now();
        assert!(matches!(frontier.poll(now), Dispatch::Ready(t) if t.url.path() == "/a"));
        assert!(matches!(frontier.poll(now), Dispatch::Ready(t) if t.url.path() == "/c"));
        assert!(matches!(frontier.poll(now), Dispatch::Wait(_)));
    }
}
