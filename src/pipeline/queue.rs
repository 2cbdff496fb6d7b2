//! Durable, at-least-once job queue for the enrichment pipeline.
//!
//! Jobs are keyed by an id derived from the item id, so re-enqueuing the
//! same item replaces the existing entry instead of duplicating it. The
//! queue survives restarts through a JSON dump; interrupted jobs are
//! re-dispatched on startup. Handlers are idempotent (every write is "set
//! field to latest computed value"), so at-least-once delivery is safe.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU16, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::items::ItemKind;
use crate::pipeline::worker::EnrichmentWorker;
use crate::storage::StorageManager;

const QUEUE_DUMP: &str = "job-queue.json";

/// How long completed entries stay visible before being pruned.
/// The dump is an operational window, not an audit log.
const DONE_RETENTION_MS: u128 = 10_000;

pub fn now() -> u128 {
    let start = SystemTime::now();
    let since_the_epoch = start
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards");
    since_the_epoch.as_millis()
}

/// Deterministic job id: one enrichment job per item.
pub fn job_id(item_id: u64) -> String {
    format!("enrich-{item_id}")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub item_id: u64,
    pub kind: ItemKind,
    #[serde(default)]
    pub attempt: u8,
    #[serde(default)]
    pub next_run_at: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    /// Retries exhausted or dead-lettered; the reason is kept for inspection.
    Dead(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDump {
    pub job: Job,
    pub status: JobStatus,
    pub updated_at: u128,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<JobDump>,
    pub now: u128,
}

impl QueueDump {
    fn empty() -> Self {
        Self {
            queue: vec![],
            now: now(),
        }
    }
}

/// Serialized access to the durable queue dump.
pub struct QueueJournal {
    storage: Arc<dyn StorageManager>,
    lock: Mutex<()>,
}

impl QueueJournal {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    pub fn read(&self) -> QueueDump {
        let _guard = self.lock.lock().unwrap();
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> QueueDump {
        if !self.storage.exists(QUEUE_DUMP) {
            return QueueDump::empty();
        }

        match self.storage.read(QUEUE_DUMP) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::error!("malformed queue dump, starting empty: {e}");
                QueueDump::empty()
            }),
            Err(e) => {
                log::error!("failed to read queue dump: {e}");
                QueueDump::empty()
            }
        }
    }

    fn write_unlocked(&self, mut dump: QueueDump) {
        dump.now = now();
        // prune completed entries past their observability window
        dump.queue.retain(|entry| {
            !matches!(entry.status, JobStatus::Done)
                || dump.now.saturating_sub(entry.updated_at) < DONE_RETENTION_MS
        });

        match serde_json::to_vec_pretty(&dump) {
            Ok(data) => {
                if let Err(e) = self.storage.write(QUEUE_DUMP, &data) {
                    log::error!("failed to write queue dump: {e}");
                }
            }
            Err(e) => log::error!("failed to serialize queue dump: {e}"),
        }
    }

    /// Insert or replace the entry with this job's id (last-write-wins).
    pub fn upsert(&self, job: &Job, status: JobStatus) {
        let _guard = self.lock.lock().unwrap();
        let mut dump = self.read_unlocked();

        let entry = JobDump {
            job: job.clone(),
            status,
            updated_at: now(),
        };

        match dump.queue.iter_mut().find(|e| e.job.id == job.id) {
            Some(existing) => *existing = entry,
            None => dump.queue.push(entry),
        }

        self.write_unlocked(dump);
    }

    pub fn set_status(&self, id: &str, status: JobStatus) {
        let _guard = self.lock.lock().unwrap();
        let mut dump = self.read_unlocked();

        if let Some(entry) = dump.queue.iter_mut().find(|e| e.job.id == id) {
            entry.status = status;
            entry.updated_at = now();
        }

        self.write_unlocked(dump);
    }
}

enum QueueMsg {
    Run(Job),
    Shutdown,
}

/// Shared enqueue state, split from the dispatcher for testability.
pub struct QueueState {
    pending: Mutex<HashSet<String>>,
    journal: QueueJournal,
}

impl QueueState {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            pending: Mutex::new(HashSet::new()),
            journal: QueueJournal::new(storage),
        }
    }

    /// Register a job. Returns `Some(job)` when it should be dispatched, or
    /// `None` when an entry with the same id is already queued or running
    /// (the dump payload is still refreshed: last-write-wins).
    fn register(&self, item_id: u64, kind: ItemKind) -> Option<Job> {
        let id = job_id(item_id);
        let job = Job {
            id: id.clone(),
            item_id,
            kind,
            attempt: 0,
            next_run_at: now(),
        };

        let mut pending = self.pending.lock().unwrap();
        if pending.contains(&id) {
            log::debug!("job {id} already queued, replacing payload");
            self.journal.upsert(&job, JobStatus::Pending);
            return None;
        }

        pending.insert(id);
        self.journal.upsert(&job, JobStatus::Pending);
        Some(job)
    }

    fn finish(&self, id: &str) {
        self.pending.lock().unwrap().remove(id);
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn dump(&self) -> QueueDump {
        self.journal.read()
    }
}

pub struct JobQueue {
    tx: mpsc::Sender<QueueMsg>,
    state: Arc<QueueState>,
}

impl JobQueue {
    /// Start the dispatcher and re-dispatch any interrupted jobs found in
    /// the dump. Returns the queue handle and the dispatcher join handle.
    pub fn start(
        worker: Arc<EnrichmentWorker>,
        storage: Arc<dyn StorageManager>,
        config: QueueConfig,
    ) -> (Self, std::thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<QueueMsg>();
        let state = Arc::new(QueueState::new(storage));

        // resume jobs that never finished in the previous run
        let interrupted: Vec<Job> = state
            .dump()
            .queue
            .iter()
            .filter(|e| matches!(e.status, JobStatus::Pending | JobStatus::InProgress))
            .map(|e| e.job.clone())
            .collect();

        for job in interrupted {
            log::info!("restarting interrupted job {}", job.id);
            state.pending.lock().unwrap().insert(job.id.clone());
            state.journal.set_status(&job.id, JobStatus::Pending);
            if tx.send(QueueMsg::Run(job)).is_err() {
                log::error!("failed to re-dispatch interrupted job");
            }
        }

        let handle = std::thread::spawn({
            let state = state.clone();
            move || run_dispatcher(rx, worker, state, config)
        });

        (Self { tx, state }, handle)
    }

    /// Enqueue an enrichment job for an item. Idempotent by job id.
    pub fn enqueue(&self, item_id: u64, kind: ItemKind) -> anyhow::Result<()> {
        if let Some(job) = self.state.register(item_id, kind) {
            self.tx
                .send(QueueMsg::Run(job))
                .map_err(|e| anyhow::anyhow!("queue dispatcher is gone: {e}"))?;
        }
        Ok(())
    }

    /// Request a graceful shutdown: in-flight jobs finish, then the
    /// dispatcher returns.
    pub fn shutdown(&self) {
        let _ = self.tx.send(QueueMsg::Shutdown);
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight()
    }

    pub fn dump(&self) -> QueueDump {
        self.state.dump()
    }
}

/// Wait for a worker slot. The admit counter only moves through this
/// function and the joiner's release, so the pool never exceeds the bound.
fn acquire_slot(active: &AtomicU16, concurrency: u16) {
    loop {
        let current = active.load(Ordering::Relaxed);
        if current < concurrency
            && active
                .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return;
        }
        sleep(Duration::from_millis(100));
    }
}

fn rand_jitter() -> u64 {
    rand::random::<u64>() % 2000
}

fn run_dispatcher(
    rx: mpsc::Receiver<QueueMsg>,
    worker: Arc<EnrichmentWorker>,
    state: Arc<QueueState>,
    config: QueueConfig,
) {
    // admitted to the bounded pool
    let active = Arc::new(AtomicU16::new(0));
    // spawned and not yet joined, including jobs waiting for a slot
    let outstanding = Arc::new(AtomicU16::new(0));

    while let Ok(msg) = rx.recv() {
        let job = match msg {
            QueueMsg::Shutdown => {
                log::info!(
                    "queue shutting down, waiting for {} outstanding jobs",
                    outstanding.load(Ordering::Relaxed)
                );
                while outstanding.load(Ordering::Relaxed) > 0 {
                    sleep(Duration::from_millis(100));
                }
                return;
            }
            QueueMsg::Run(job) => job,
        };

        outstanding.fetch_add(1, Ordering::Relaxed);

        let task_handle = std::thread::spawn({
            let worker = worker.clone();
            let state = state.clone();
            let config = config.clone();
            let active = active.clone();
            let job = job.clone();
            move || {
                acquire_slot(&active, config.concurrency);
                run_job_with_retries(&worker, &state.journal, job, &config);
            }
        });

        // joiner handles panics so the slot and pending entry are always released
        std::thread::spawn({
            let state = state.clone();
            let active = active.clone();
            let outstanding = outstanding.clone();
            move || {
                if let Err(err) = task_handle.join() {
                    log::error!("job {} panicked: {err:?}", job.id);
                    state
                        .journal
                        .set_status(&job.id, JobStatus::Dead("panic".to_string()));
                }
                state.finish(&job.id);
                active.fetch_sub(1, Ordering::Relaxed);
                outstanding.fetch_sub(1, Ordering::Relaxed);
            }
        });
    }
}

fn run_job_with_retries(
    worker: &EnrichmentWorker,
    journal: &QueueJournal,
    mut job: Job,
    config: &QueueConfig,
) {
    loop {
        journal.set_status(&job.id, JobStatus::InProgress);

        let final_attempt = job.attempt >= config.max_retries;
        match worker.run_job(&job, final_attempt) {
            Ok(()) => {
                journal.set_status(&job.id, JobStatus::Done);
                return;
            }
            Err(err) if err.is_retryable() && !final_attempt => {
                job.attempt += 1;
                let delay_ms =
                    config.base_delay_ms * 2u64.pow(job.attempt as u32 - 1) + rand_jitter();
                log::info!(
                    "job {}: retrying (attempt {}/{}) after error: {err}, backoff {delay_ms}ms",
                    job.id,
                    job.attempt,
                    config.max_retries,
                    delay_ms
                );
                job.next_run_at = now() + delay_ms as u128;
                journal.upsert(&job, JobStatus::Pending);
                sleep(Duration::from_millis(delay_ms));
            }
            Err(err) => {
                log::error!("job {} dead: {err}", job.id);
                journal.set_status(&job.id, JobStatus::Dead(err.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendLocal;

    fn test_state() -> (tempfile::TempDir, QueueState) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn StorageManager> =
            Arc::new(BackendLocal::new(dir.path().to_str().unwrap()).unwrap());
        let state = QueueState::new(storage);
        (dir, state)
    }

    #[test]
    fn test_job_id_is_deterministic() {
        assert_eq!(job_id(42), "enrich-42");
        assert_eq!(job_id(42), job_id(42));
    }

    #[test]
    fn test_register_twice_yields_single_entry() {
        let (_dir, state) = test_state();

        let first = state.register(7, ItemKind::Text);
        assert!(first.is_some());

        // second enqueue before the first run completes: no new dispatch
        let second = state.register(7, ItemKind::Text);
        assert!(second.is_none());

        let dump = state.dump();
        assert_eq!(dump.queue.len(), 1);
        assert_eq!(dump.queue[0].job.id, "enrich-7");
        assert_eq!(state.in_flight(), 1);
    }

    #[test]
    fn test_register_again_after_finish() {
        let (_dir, state) = test_state();

        let job = state.register(7, ItemKind::Text).unwrap();
        state.finish(&job.id);

        assert!(state.register(7, ItemKind::Text).is_some());
    }

    #[test]
    fn test_different_items_get_distinct_entries() {
        let (_dir, state) = test_state();

        state.register(1, ItemKind::Text).unwrap();
        state.register(2, ItemKind::Link).unwrap();

        assert_eq!(state.dump().queue.len(), 2);
    }

    #[test]
    fn test_journal_done_entries_pruned_after_retention() {
        let (_dir, state) = test_state();

        let job = state.register(1, ItemKind::Text).unwrap();
        state.journal.set_status(&job.id, JobStatus::Done);

        // backdate the completion past the retention window
        let mut dump = state.journal.read();
        dump.queue[0].updated_at = now() - DONE_RETENTION_MS - 1;
        {
            let _guard = state.journal.lock.lock().unwrap();
            let data = serde_json::to_vec_pretty(&dump).unwrap();
            state.journal.storage.write(QUEUE_DUMP, &data).unwrap();
        }

        // any write prunes stale completed entries
        state.register(2, ItemKind::Text).unwrap();
        let dump = state.journal.read();
        assert_eq!(dump.queue.len(), 1);
        assert_eq!(dump.queue[0].job.id, "enrich-2");
    }

    #[test]
    fn test_journal_survives_malformed_dump() {
        let (_dir, state) = test_state();
        state.journal.storage.write(QUEUE_DUMP, b"not json").unwrap();
        assert!(state.dump().queue.is_empty());
    }

    mod end_to_end {
        use super::*;
        use crate::ai::AiAdapter;
        use crate::items::{BackendJson, ContentPatch, Item, ItemCreate, ItemStatus, ItemStore};
        use crate::ocr::DisabledOcr;
        use crate::vector::VectorStore;
        use std::time::{Duration, Instant};

        struct Harness {
            _dir: tempfile::TempDir,
            store: Arc<dyn ItemStore>,
            storage: Arc<dyn StorageManager>,
        }

        fn harness() -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let storage: Arc<dyn StorageManager> =
                Arc::new(BackendLocal::new(dir.path().to_str().unwrap()).unwrap());
            let store: Arc<dyn ItemStore> = Arc::new(BackendJson::load(storage.clone()).unwrap());
            Harness {
                _dir: dir,
                store,
                storage,
            }
        }

        fn worker(h: &Harness) -> Arc<crate::pipeline::worker::EnrichmentWorker> {
            let ai = Arc::new(AiAdapter::disabled());
            let vectors = Arc::new(VectorStore::load(
                h.storage.clone(),
                ai.embed_dimensions(),
                &ai.embed_fingerprint(),
            ));
            Arc::new(crate::pipeline::worker::EnrichmentWorker::new(
                h.store.clone(),
                h.storage.clone(),
                ai,
                Arc::new(DisabledOcr),
                vectors,
                Duration::from_secs(2),
            ))
        }

        fn fast_config() -> QueueConfig {
            QueueConfig {
                concurrency: 2,
                max_retries: 1,
                base_delay_ms: 10,
            }
        }

        fn text_item(h: &Harness, body: &str) -> Item {
            let item = h
                .store
                .create(ItemCreate {
                    kind: ItemKind::Text,
                    title: "note".to_string(),
                    source_url: None,
                })
                .unwrap();
            h.store
                .upsert_content(
                    item.id,
                    ContentPatch {
                        text: Some(body.to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
            item
        }

        fn wait_until(check: impl Fn() -> bool) {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !check() {
                assert!(Instant::now() < deadline, "condition not met in time");
                sleep(Duration::from_millis(20));
            }
        }

        #[test]
        fn test_enqueued_job_runs_to_done() {
            let h = harness();
            let (queue, handle) = JobQueue::start(worker(&h), h.storage.clone(), fast_config());

            let item = text_item(&h, "queued body text");
            queue.enqueue(item.id, item.kind).unwrap();

            wait_until(|| queue.in_flight() == 0);

            let record = h.store.get(item.id).unwrap().unwrap();
            assert_eq!(record.item.status, ItemStatus::Processed);

            let dump = queue.dump();
            let entry = dump.queue.iter().find(|e| e.job.id == job_id(item.id));
            // either still visible as Done or already pruned
            if let Some(entry) = entry {
                assert!(matches!(entry.status, JobStatus::Done));
            }

            queue.shutdown();
            handle.join().unwrap();
        }

        #[test]
        fn test_transient_failure_retries_then_dead_letters() {
            let h = harness();
            let (queue, handle) = JobQueue::start(worker(&h), h.storage.clone(), fast_config());

            // connection refused: transient, retried once, then exhausted
            let item = h
                .store
                .create(ItemCreate {
                    kind: ItemKind::Link,
                    title: String::new(),
                    source_url: Some("http://127.0.0.1:9/".to_string()),
                })
                .unwrap();
            queue.enqueue(item.id, item.kind).unwrap();

            wait_until(|| queue.in_flight() == 0);

            let record = h.store.get(item.id).unwrap().unwrap();
            // exhausted retries notify through the item status
            assert_eq!(record.item.status, ItemStatus::Failed);

            let dump = queue.dump();
            let entry = dump
                .queue
                .iter()
                .find(|e| e.job.id == job_id(item.id))
                .unwrap();
            assert!(matches!(entry.status, JobStatus::Dead(_)));
            assert_eq!(entry.job.attempt, 1);

            queue.shutdown();
            handle.join().unwrap();
        }

        #[test]
        fn test_missing_item_dead_letters_without_retry() {
            let h = harness();
            let (queue, handle) = JobQueue::start(worker(&h), h.storage.clone(), fast_config());

            queue.enqueue(404, ItemKind::Text).unwrap();
            wait_until(|| queue.in_flight() == 0);

            let dump = queue.dump();
            let entry = dump.queue.iter().find(|e| e.job.id == job_id(404)).unwrap();
            assert!(matches!(entry.status, JobStatus::Dead(_)));
            assert_eq!(entry.job.attempt, 0);

            queue.shutdown();
            handle.join().unwrap();
        }

        #[test]
        fn test_interrupted_job_resumes_on_start() {
            let h = harness();
            let item = text_item(&h, "left behind by a previous run");

            // a previous process registered the job but never finished it
            {
                let state = QueueState::new(h.storage.clone());
                state.register(item.id, item.kind).unwrap();
            }

            let (queue, handle) = JobQueue::start(worker(&h), h.storage.clone(), fast_config());
            wait_until(|| queue.in_flight() == 0);

            let record = h.store.get(item.id).unwrap().unwrap();
            assert_eq!(record.item.status, ItemStatus::Processed);

            queue.shutdown();
            handle.join().unwrap();
        }

        #[test]
        fn test_shutdown_returns_promptly_when_idle() {
            let h = harness();
            let (queue, handle) = JobQueue::start(worker(&h), h.storage.clone(), fast_config());
            queue.shutdown();
            handle.join().unwrap();
        }

        #[test]
        fn test_no_item_left_processing_after_any_outcome() {
            let h = harness();
            let (queue, handle) = JobQueue::start(worker(&h), h.storage.clone(), fast_config());

            let ok_item = text_item(&h, "fine");
            let bad_item = h
                .store
                .create(ItemCreate {
                    kind: ItemKind::Link,
                    title: String::new(),
                    source_url: Some("http://127.0.0.1:9/".to_string()),
                })
                .unwrap();

            queue.enqueue(ok_item.id, ok_item.kind).unwrap();
            queue.enqueue(bad_item.id, bad_item.kind).unwrap();

            wait_until(|| queue.in_flight() == 0);
            queue.shutdown();
            handle.join().unwrap();

            for record in h.store.list().unwrap() {
                assert_ne!(record.item.status, ItemStatus::Processing);
            }
        }
    }
}
