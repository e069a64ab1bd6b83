use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::config::UploadConfig;
use crate::models::error::{TransportError, UploadError};
use crate::models::report::ReportBundle;
use crate::models::state::FailureReason;
use crate::models::upload_models::{TaskPhase, UploadStatus, UploadTask, UploadTaskHandle};
use crate::storage::upload_store::UploadTaskStore;
use crate::traits::transport::UploadTransport;
use crate::upload::retry::{Backoff, RetryDecision, RetryPolicy};

struct EntryState {
    status: UploadStatus,
    cancelled: bool,
    running: bool,
}

/// In-memory view of one bundle's upload, shared with its worker thread.
struct TaskEntry {
    state: Mutex<EntryState>,
    changed: Condvar,
}

impl TaskEntry {
    fn new(status: UploadStatus) -> Self {
        Self {
            state: Mutex::new(EntryState {
                status,
                cancelled: false,
                running: true,
            }),
            changed: Condvar::new(),
        }
    }

    fn set_status(&self, status: UploadStatus) {
        self.state.lock().status = status;
        self.changed.notify_all();
    }

    fn finish(&self, status: UploadStatus) {
        {
            let mut state = self.state.lock();
            state.status = status;
            state.running = false;
        }
        self.changed.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Sleeps for `delay` unless cancelled first. Returns `true` if cancelled.
    fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        while !state.cancelled {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.cancelled
    }
}

/// Why a worker stopped before confirmation.
enum Halt {
    Cancelled,
    Failed(FailureReason),
}

struct ManagerInner {
    transport: Arc<dyn UploadTransport>,
    store: UploadTaskStore,
    chunk_size: usize,
    retry: RetryPolicy,
    purge_after_upload: bool,
    tasks: Mutex<HashMap<String, Arc<TaskEntry>>>,
}

/// Uploads report bundles in the background.
///
/// Each bundle gets its own worker thread; distinct bundles upload
/// concurrently, while a bundle with an attempt in flight is never started
/// twice. Chunks go out in offset order and the task record is checkpointed
/// after every acknowledged chunk.
///
/// Transient errors are retried with exponential backoff up to
/// `RetryPolicy::max_retries` consecutive failures; permanent rejections stop
/// the task immediately. Cancel and failure keep the record and the bundle,
/// so a later `submit` continues from the last checkpoint.
#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<ManagerInner>,
}

impl UploadManager {
    pub fn new(transport: Arc<dyn UploadTransport>, config: &UploadConfig) -> Result<Self, UploadError> {
        config.validate().map_err(UploadError::ConfigurationFailed)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                transport,
                store: UploadTaskStore::new(&config.state_directory),
                chunk_size: config.chunk_size,
                retry: config.retry,
                purge_after_upload: config.purge_after_upload,
                tasks: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn store(&self) -> &UploadTaskStore {
        &self.inner.store
    }

    /// Starts (or continues) uploading `bundle`.
    ///
    /// If an attempt for the same bundle id is in flight its handle is
    /// returned unchanged. A persisted record for the bundle is reused, so the
    /// transfer resumes from its checkpoint.
    pub fn submit(&self, bundle: &ReportBundle) -> Result<UploadTaskHandle, UploadError> {
        let bundle_id = bundle.id().to_string();
        let handle = UploadTaskHandle::new(bundle_id.clone());
        if bundle.payload().is_some_and(|payload| payload.byte_size == 0) {
            return Err(UploadError::InvalidBundle(format!("bundle {} has an empty payload", bundle_id)));
        }

        let mut tasks = self.inner.tasks.lock();
        if let Some(entry) = tasks.get(&bundle_id) {
            if entry.state.lock().running {
                log::debug!("upload of {} already in flight", bundle_id);
                return Ok(handle);
            }
        }

        let mut task = match self.inner.store.load(&bundle_id)? {
            Some(task) if task.total_bytes == bundle.payload_size() => {
                log::info!(
                    "resuming upload of {} at {}/{} bytes",
                    bundle_id,
                    task.bytes_sent(),
                    task.total_bytes
                );
                task
            }
            Some(stale) => {
                log::warn!(
                    "upload record for {} expects {} bytes, bundle has {}; starting over",
                    bundle_id,
                    stale.total_bytes,
                    bundle.payload_size()
                );
                self.new_task(bundle)
            }
            None => self.new_task(bundle),
        };
        task.failure = None;
        task.set_phase(TaskPhase::Pending);
        self.inner.store.save(&task)?;

        let initial = if task.bytes_sent() > 0 {
            UploadStatus::InProgress {
                bytes_sent: task.bytes_sent(),
                total_bytes: task.total_bytes,
            }
        } else {
            UploadStatus::Pending
        };
        let entry = Arc::new(TaskEntry::new(initial));
        tasks.insert(bundle_id.clone(), Arc::clone(&entry));
        drop(tasks);

        let inner = Arc::clone(&self.inner);
        let worker_bundle = bundle.clone();
        let worker_entry = Arc::clone(&entry);
        let spawned = thread::Builder::new()
            .name(format!("upload-{}", bundle_id.chars().take(8).collect::<String>()))
            .spawn(move || run_upload(&inner, &worker_bundle, task, &worker_entry));

        if let Err(e) = spawned {
            let reason = FailureReason::StorageError(format!("failed to spawn upload worker: {}", e));
            entry.finish(UploadStatus::Failed { reason });
            return Err(UploadError::StorageError(format!("failed to spawn upload worker: {}", e)));
        }
        Ok(handle)
    }

    fn new_task(&self, bundle: &ReportBundle) -> UploadTask {
        UploadTask::new(
            bundle.id(),
            bundle.directory().to_path_buf(),
            self.inner.transport.destination(),
            bundle.payload_size(),
        )
    }

    /// Restarts every upload that was interrupted by a process exit.
    ///
    /// Failed and cancelled records are left for an explicit `submit`.
    /// Records whose bundle can no longer be opened are discarded.
    pub fn resume_pending(&self) -> Result<Vec<UploadTaskHandle>, UploadError> {
        let mut handles = Vec::new();
        for task in self.inner.store.load_all()? {
            if matches!(task.phase, TaskPhase::Failed | TaskPhase::Cancelled) {
                continue;
            }
            match ReportBundle::open(&task.bundle_directory) {
                Ok(bundle) => handles.push(self.submit(&bundle)?),
                Err(e) => {
                    log::warn!("dropping upload record for {}: {}", task.bundle_id, e);
                    self.inner.store.remove(&task.bundle_id)?;
                }
            }
        }
        Ok(handles)
    }

    pub fn status(&self, handle: &UploadTaskHandle) -> Result<UploadStatus, UploadError> {
        if let Some(entry) = self.entry(handle) {
            return Ok(entry.state.lock().status.clone());
        }
        match self.inner.store.load(handle.bundle_id())? {
            Some(task) => Ok(match task.phase {
                TaskPhase::Pending => UploadStatus::Pending,
                TaskPhase::InProgress => UploadStatus::InProgress {
                    bytes_sent: task.bytes_sent(),
                    total_bytes: task.total_bytes,
                },
                TaskPhase::Cancelled => UploadStatus::Cancelled,
                TaskPhase::Failed => UploadStatus::Failed {
                    reason: task.failure.unwrap_or_else(|| {
                        FailureReason::NetworkError(task.last_error.unwrap_or_else(|| "upload failed".into()))
                    }),
                },
            }),
            None => Err(UploadError::UnknownTask(handle.bundle_id().to_string())),
        }
    }

    /// Stops the upload after the request in flight (if any) returns.
    /// The bundle and the checkpoint are kept.
    pub fn cancel(&self, handle: &UploadTaskHandle) -> Result<(), UploadError> {
        let entry = self
            .entry(handle)
            .ok_or_else(|| UploadError::UnknownTask(handle.bundle_id().to_string()))?;
        {
            let mut state = entry.state.lock();
            if !state.running {
                return Ok(());
            }
            state.cancelled = true;
        }
        entry.changed.notify_all();
        log::info!("cancelling upload of {}", handle.bundle_id());
        Ok(())
    }

    /// Blocks until the upload reaches a terminal status or `timeout` passes,
    /// then returns the current status.
    pub fn wait(&self, handle: &UploadTaskHandle, timeout: Duration) -> Result<UploadStatus, UploadError> {
        let entry = self
            .entry(handle)
            .ok_or_else(|| UploadError::UnknownTask(handle.bundle_id().to_string()))?;
        let deadline = Instant::now() + timeout;
        let mut state = entry.state.lock();
        while !state.status.is_terminal() {
            if entry.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Ok(state.status.clone())
    }

    /// Blocks until the status differs from `previous` (or is terminal) or
    /// `timeout` passes.
    pub fn wait_for_change(
        &self,
        handle: &UploadTaskHandle,
        previous: &UploadStatus,
        timeout: Duration,
    ) -> Result<UploadStatus, UploadError> {
        let entry = self
            .entry(handle)
            .ok_or_else(|| UploadError::UnknownTask(handle.bundle_id().to_string()))?;
        let deadline = Instant::now() + timeout;
        let mut state = entry.state.lock();
        while state.status == *previous && !state.status.is_terminal() {
            if entry.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Ok(state.status.clone())
    }

    pub fn active_uploads(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .values()
            .filter(|entry| entry.state.lock().running)
            .count()
    }

    fn entry(&self, handle: &UploadTaskHandle) -> Option<Arc<TaskEntry>> {
        self.inner.tasks.lock().get(handle.bundle_id()).cloned()
    }
}

fn run_upload(inner: &ManagerInner, bundle: &ReportBundle, mut task: UploadTask, entry: &TaskEntry) {
    let status = match transfer(inner, bundle, &mut task, entry) {
        Ok(confirmation_id) => {
            log::info!("report {} confirmed as {}", task.bundle_id, confirmation_id);
            if let Err(e) = inner.store.remove(&task.bundle_id) {
                log::warn!("failed to remove upload record for {}: {}", task.bundle_id, e);
            }
            if inner.purge_after_upload {
                if let Err(e) = fs::remove_dir_all(bundle.directory()) {
                    log::warn!("failed to purge bundle {}: {}", bundle.directory().display(), e);
                }
            }
            UploadStatus::Succeeded { confirmation_id }
        }
        Err(Halt::Cancelled) => {
            log::info!("upload of {} cancelled at {} bytes", task.bundle_id, task.bytes_sent());
            task.set_phase(TaskPhase::Cancelled);
            save_quietly(inner, &task);
            UploadStatus::Cancelled
        }
        Err(Halt::Failed(reason)) => {
            log::error!("upload of {} failed: {}", task.bundle_id, reason);
            task.record_error(reason.message());
            task.failure = Some(reason.clone());
            task.set_phase(TaskPhase::Failed);
            save_quietly(inner, &task);
            UploadStatus::Failed { reason }
        }
    };
    entry.finish(status);
}

fn transfer(
    inner: &ManagerInner,
    bundle: &ReportBundle,
    task: &mut UploadTask,
    entry: &TaskEntry,
) -> Result<String, Halt> {
    let mut backoff = Backoff::new(inner.retry);
    let total = task.total_bytes;

    task.set_phase(TaskPhase::InProgress);
    checkpoint(inner, task)?;

    let upload_id = match task.upload_id.clone() {
        Some(id) => id,
        None => {
            let id = with_retry(inner, task, entry, &mut backoff, "open", |transport| transport.open(bundle))?;
            task.upload_id = Some(id.clone());
            checkpoint(inner, task)?;
            id
        }
    };

    let mut payload = match bundle.payload_path() {
        Some(path) if total > 0 => Some(fs::File::open(&path).map_err(|e| {
            Halt::Failed(FailureReason::MissingArtifact(format!("{}: {}", path.display(), e)))
        })?),
        _ => None,
    };
    let mut buf = vec![0u8; inner.chunk_size.max(1)];

    entry.set_status(UploadStatus::InProgress {
        bytes_sent: task.bytes_sent(),
        total_bytes: total,
    });

    while !task.is_complete() {
        if entry.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let Some(file) = payload.as_mut() else {
            return Err(Halt::Failed(FailureReason::MissingArtifact(format!(
                "bundle {} has no payload file",
                task.bundle_id
            ))));
        };
        let offset = task.bytes_sent();
        let len = (total - offset).min(buf.len() as u64) as usize;
        let chunk = &mut buf[..len];
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(chunk))
            .map_err(|e| Halt::Failed(FailureReason::StorageError(format!("failed to read payload: {}", e))))?;

        let chunk = &buf[..len];
        let acknowledged = with_retry(inner, task, entry, &mut backoff, "chunk", |transport| {
            let acked = transport.send_chunk(&upload_id, offset, total, chunk)?;
            if acked <= offset {
                return Err(TransportError::Transient(format!(
                    "server acknowledged {} bytes after chunk at offset {}",
                    acked, offset
                )));
            }
            Ok(acked)
        })?;

        task.advance_to(acknowledged)
            .map_err(|e| Halt::Failed(FailureReason::RejectedByServer(e)))?;
        checkpoint(inner, task)?;
        entry.set_status(UploadStatus::InProgress {
            bytes_sent: task.bytes_sent(),
            total_bytes: total,
        });
        log::debug!("{}: {}/{} bytes", task.bundle_id, task.bytes_sent(), total);
    }

    if entry.is_cancelled() {
        return Err(Halt::Cancelled);
    }
    with_retry(inner, task, entry, &mut backoff, "confirm", |transport| {
        transport.confirm(&upload_id)
    })
}

/// Runs `op` until it succeeds, is rejected, exhausts the retry budget, or
/// the task is cancelled.
fn with_retry<T>(
    inner: &ManagerInner,
    task: &mut UploadTask,
    entry: &TaskEntry,
    backoff: &mut Backoff,
    what: &str,
    mut op: impl FnMut(&dyn UploadTransport) -> Result<T, TransportError>,
) -> Result<T, Halt> {
    loop {
        if entry.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let error = match op(inner.transport.as_ref()) {
            Ok(value) => {
                backoff.record_success();
                return Ok(value);
            }
            Err(e) if e.is_permanent() => {
                return Err(Halt::Failed(FailureReason::RejectedByServer(e.to_string())));
            }
            Err(e) => e,
        };

        task.retry_count += 1;
        task.record_error(error.to_string());
        save_quietly(inner, task);

        match backoff.record_failure(Instant::now()) {
            RetryDecision::GiveUp => {
                return Err(Halt::Failed(FailureReason::NetworkError(format!(
                    "{} failed after {} attempts: {}",
                    what,
                    backoff.attempts(),
                    error
                ))));
            }
            RetryDecision::RetryAfter(delay) => {
                log::warn!(
                    "{} for {} failed ({}), retry {} in {:?}",
                    what,
                    task.bundle_id,
                    error,
                    backoff.attempts(),
                    delay
                );
                if entry.sleep_unless_cancelled(delay) {
                    return Err(Halt::Cancelled);
                }
            }
        }
    }
}

fn checkpoint(inner: &ManagerInner, task: &UploadTask) -> Result<(), Halt> {
    inner
        .store
        .save(task)
        .map_err(|e| Halt::Failed(FailureReason::StorageError(e.to_string())))
}

fn save_quietly(inner: &ManagerInner, task: &UploadTask) {
    if let Err(e) = inner.store.save(task) {
        log::warn!("failed to persist upload record for {}: {}", task.bundle_id, e);
    }
}
