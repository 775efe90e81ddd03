//! Durable FIFO work queue with leases, retries and cancellation.
//!
//! Delivery is at-least-once: a worker leases an item, and only an
//! explicit completion removes it. `attempts_made` is incremented and
//! persisted at lease time, so a worker crash leaves a truthful count
//! behind; the expired lease simply makes the item leasable again.
//! Retryable failures re-gate the item with exponential backoff
//! starting at 5 s. Completed items land in a bounded debug history.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::filesys::Dir;
use crate::models::job::{CompletedJob, JobItem, JobPayload};
use crate::utils::{calc_exp_backoff, generate_uuid, CooldownOptions};

/// Bounded history of completed items kept for debugging
const HISTORY_CAPACITY: usize = 50;

/// Slack added to the job timeout before a lease is considered dead
const LEASE_GRACE: Duration = Duration::from_secs(60);

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The item was still queued and has been removed
    Removed,
    /// The item is leased; intent recorded for the worker to observe
    Flagged,
    /// No such job
    NotFound,
}

#[derive(Debug, Clone)]
struct Lease {
    worker: String,
    expires_at: DateTime<Utc>,
}

struct QueueInner {
    items: HashMap<String, JobItem>,
    /// FIFO ordering of job ids
    order: VecDeque<String>,
    leases: HashMap<String, Lease>,
    history: VecDeque<CompletedJob>,
}

pub struct JobQueue {
    dir: Dir,
    inner: Mutex<QueueInner>,
    notify: Notify,
    backoff: CooldownOptions,
}

impl JobQueue {
    /// Open the queue, recovering persisted items. Nothing is leased
    /// after a restart, so every recovered item is immediately eligible.
    pub async fn open(dir: Dir) -> Result<Self, Error> {
        dir.create().await?;
        dir.subdir("items").create().await?;

        let mut items = HashMap::new();
        let mut order: Vec<JobItem> = Vec::new();

        for path in dir.subdir("items").list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match crate::filesys::File::new(&path).read_json::<JobItem>().await {
                Ok(item) => order.push(item),
                Err(e) => warn!("Skipping unreadable job file {:?}: {}", path, e),
            }
        }

        order.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        let order_ids: VecDeque<String> = order.iter().map(|i| i.job_id.clone()).collect();
        for item in order {
            items.insert(item.job_id.clone(), item);
        }

        let history = dir
            .file("history.json")
            .read_json::<Vec<CompletedJob>>()
            .await
            .unwrap_or_default()
            .into();

        let recovered = items.len();
        if recovered > 0 {
            info!("Recovered {} queued jobs from disk", recovered);
        }

        Ok(Self {
            dir,
            inner: Mutex::new(QueueInner {
                items,
                order: order_ids,
                leases: HashMap::new(),
                history,
            }),
            notify: Notify::new(),
            backoff: CooldownOptions::default(),
        })
    }

    /// Add a work item. Durable before return.
    pub async fn enqueue(
        &self,
        deployment_id: &str,
        payload: JobPayload,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<JobItem, Error> {
        let item = JobItem {
            job_id: generate_uuid(),
            deployment_id: deployment_id.to_string(),
            attempts_made: 0,
            max_attempts,
            timeout_ms: timeout.as_millis() as u64,
            payload,
            enqueued_at: Utc::now(),
            not_before: None,
            cancel_requested: false,
        };

        self.persist_item(&item).await?;

        let mut inner = self.inner.lock().await;
        inner.order.push_back(item.job_id.clone());
        inner.items.insert(item.job_id.clone(), item.clone());
        drop(inner);

        self.notify.notify_waiters();
        debug!("Enqueued job {} for deployment {}", item.job_id, deployment_id);
        Ok(item)
    }

    /// Block until an item can be leased or shutdown is signalled.
    ///
    /// Leasing increments and persists `attempts_made` before the item
    /// is handed out.
    pub async fn lease_next(
        &self,
        worker: &str,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<JobItem> {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                self.expire_dead_leases(&mut inner);

                if let Some(job_id) = self.pick_eligible(&inner) {
                    let item = inner.items.get_mut(&job_id).expect("picked item exists");
                    item.attempts_made += 1;
                    item.not_before = None;
                    let leased = item.clone();

                    let ttl = Duration::from_millis(leased.timeout_ms) + LEASE_GRACE;
                    inner.leases.insert(
                        job_id.clone(),
                        Lease {
                            worker: worker.to_string(),
                            expires_at: Utc::now()
                                + chrono::Duration::from_std(ttl)
                                    .unwrap_or_else(|_| chrono::Duration::zero()),
                        },
                    );
                    drop(inner);

                    if let Err(e) = self.persist_item(&leased).await {
                        warn!("Failed to persist lease for {}: {}", leased.job_id, e);
                    }
                    debug!("Worker {} leased job {}", worker, leased.job_id);
                    return Some(leased);
                }

                self.next_wakeup(&inner)
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => return None,
            }
        }
    }

    /// Remove the item permanently (success or non-retryable failure)
    /// and record it in the bounded history.
    pub async fn complete(
        &self,
        job_id: &str,
        outcome: &str,
        error: Option<String>,
    ) -> Result<(), Error> {
        let (entry, history) = {
            let mut inner = self.inner.lock().await;
            inner.leases.remove(job_id);
            inner.order.retain(|id| id != job_id);
            let item = inner
                .items
                .remove(job_id)
                .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

            let entry = CompletedJob {
                job_id: item.job_id,
                deployment_id: item.deployment_id,
                attempts_made: item.attempts_made,
                completed_at: Utc::now(),
                outcome: outcome.to_string(),
                error,
            };
            inner.history.push_back(entry.clone());
            while inner.history.len() > HISTORY_CAPACITY {
                inner.history.pop_front();
            }
            let history: Vec<CompletedJob> = inner.history.iter().cloned().collect();
            (entry, history)
        };

        self.dir.file(&format!("items/{}.json", job_id)).delete().await?;
        self.dir.file("history.json").write_json_atomic(&history).await?;
        info!(
            "Job {} completed: {} (attempts: {})",
            job_id, entry.outcome, entry.attempts_made
        );
        Ok(())
    }

    /// Release a leased item back for retry with exponential backoff.
    ///
    /// Callers check `JobItem::can_retry` first; an exhausted item must
    /// be completed instead.
    pub async fn release_for_retry(&self, job_id: &str) -> Result<(), Error> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.leases.remove(job_id);
            let backoff = &self.backoff;
            let item = inner
                .items
                .get_mut(job_id)
                .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

            let delay = calc_exp_backoff(backoff, item.attempts_made.saturating_sub(1));
            item.not_before = Some(
                Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            );
            info!(
                "Job {} will retry in {:?} (attempt {}/{})",
                job_id, delay, item.attempts_made, item.max_attempts
            );
            item.clone()
        };

        self.persist_item(&snapshot).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Cancel a job: remove it when still queued, otherwise record
    /// intent for the owning worker's next checkpoint.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome, Error> {
        let (outcome, snapshot) = {
            let mut inner = self.inner.lock().await;
            if !inner.items.contains_key(job_id) {
                return Ok(CancelOutcome::NotFound);
            }

            if inner.leases.contains_key(job_id) {
                let item = inner.items.get_mut(job_id).expect("checked above");
                item.cancel_requested = true;
                (CancelOutcome::Flagged, Some(item.clone()))
            } else {
                inner.order.retain(|id| id != job_id);
                let item = inner.items.remove(job_id).expect("checked above");
                let entry = CompletedJob {
                    job_id: item.job_id.clone(),
                    deployment_id: item.deployment_id.clone(),
                    attempts_made: item.attempts_made,
                    completed_at: Utc::now(),
                    outcome: "cancelled".to_string(),
                    error: None,
                };
                inner.history.push_back(entry);
                while inner.history.len() > HISTORY_CAPACITY {
                    inner.history.pop_front();
                }
                (CancelOutcome::Removed, None)
            }
        };

        match outcome {
            CancelOutcome::Flagged => {
                if let Some(item) = snapshot {
                    self.persist_item(&item).await?;
                }
            }
            CancelOutcome::Removed => {
                self.dir.file(&format!("items/{}.json", job_id)).delete().await?;
            }
            CancelOutcome::NotFound => {}
        }
        Ok(outcome)
    }

    /// Cooperative checkpoint: has cancellation been requested?
    pub async fn is_cancel_requested(&self, job_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .items
            .get(job_id)
            .map(|item| item.cancel_requested)
            .unwrap_or(false)
    }

    /// Current backlog depth (pending, unleased items).
    pub async fn backlog(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.items.len() - inner.leases.len()
    }

    /// Recent completed items, newest last.
    pub async fn history(&self) -> Vec<CompletedJob> {
        let inner = self.inner.lock().await;
        inner.history.iter().cloned().collect()
    }

    fn pick_eligible(&self, inner: &QueueInner) -> Option<String> {
        let now = Utc::now();
        inner
            .order
            .iter()
            .find(|id| {
                let Some(item) = inner.items.get(*id) else {
                    return false;
                };
                !inner.leases.contains_key(*id)
                    && !item.cancel_requested
                    && item.attempts_made < item.max_attempts
                    && item.not_before.is_none_or(|gate| gate <= now)
            })
            .cloned()
    }

    fn next_wakeup(&self, inner: &QueueInner) -> Duration {
        let now = Utc::now();
        inner
            .items
            .values()
            .filter(|item| !inner.leases.contains_key(&item.job_id))
            .filter_map(|item| item.not_before)
            .filter(|gate| *gate > now)
            .map(|gate| (gate - now).to_std().unwrap_or(Duration::from_secs(1)))
            .min()
            .unwrap_or(Duration::from_secs(5))
    }

    /// Drop leases whose worker stopped acking; exhausted items are
    /// closed out, the rest become leasable again.
    fn expire_dead_leases(&self, inner: &mut QueueInner) {
        let now = Utc::now();
        let expired: Vec<String> = inner
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for job_id in expired {
            let lease = inner.leases.remove(&job_id);
            if let Some(lease) = lease {
                warn!(
                    "Lease on job {} held by worker {} expired, re-enqueueing",
                    job_id, lease.worker
                );
            }
            if let Some(item) = inner.items.get(&job_id) {
                if item.attempts_made >= item.max_attempts {
                    inner.order.retain(|id| id != &job_id);
                    if let Some(item) = inner.items.remove(&job_id) {
                        inner.history.push_back(CompletedJob {
                            job_id: item.job_id,
                            deployment_id: item.deployment_id,
                            attempts_made: item.attempts_made,
                            completed_at: now,
                            outcome: "failed".to_string(),
                            error: Some("lease expired with attempts exhausted".to_string()),
                        });
                        while inner.history.len() > HISTORY_CAPACITY {
                            inner.history.pop_front();
                        }
                    }
                }
            }
        }
    }

    async fn persist_item(&self, item: &JobItem) -> Result<(), Error> {
        self.dir
            .file(&format!("items/{}.json", item.job_id))
            .write_json_atomic(item)
            .await
    }
}
