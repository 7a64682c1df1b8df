//! Per-file control loop: feeds idle workers, integrates outcomes, adapts
//! the batch size.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::glossary::{self, Rewrite};
use crate::script::Entry;
use crate::worker::{FailureKind, Order, Slot, Worker};

mod tests;

/// Knobs for one file's run.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub history_size: usize,
    pub tick: Duration,
}

/// Per-file result: completed entries sorted by index, plus the ones
/// excluded as poison.
#[derive(Debug)]
pub struct FileOutcome {
    pub done: Vec<Entry>,
    pub excluded: Vec<Entry>,
}

pub struct Dispatcher {
    queue: Vec<Entry>,
    done: Vec<Entry>,
    excluded: Vec<Entry>,
    total: usize,
    batch_size: usize,
    initial_batch_size: usize,
    history_size: usize,
    tick: Duration,
    post_dict: Arc<Vec<Rewrite>>,
    /// Translations completed earlier in this file, by `(source, speaker)`;
    /// identical entries skip the wire.
    memo: HashMap<(String, Option<String>), (String, Option<String>)>,
    interrupt: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        pending: Vec<Entry>,
        config: &DispatchConfig,
        post_dict: Arc<Vec<Rewrite>>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let mut queue = pending;
        queue.sort_by_key(|entry| entry.index);
        Self {
            total: queue.len(),
            queue,
            done: Vec::new(),
            excluded: Vec::new(),
            batch_size: config.batch_size.max(1),
            initial_batch_size: config.batch_size.max(1),
            history_size: config.history_size,
            tick: config.tick,
            post_dict,
            memo: HashMap::new(),
            interrupt,
        }
    }

    /// Run until every pending entry is completed or excluded. When the
    /// interrupt flag goes up, stop assigning and drain in-flight batches.
    pub async fn run(mut self, workers: &[Worker]) -> FileOutcome {
        loop {
            let mut any_busy = false;
            for worker in workers {
                let mut slot = worker.slot.lock().await;
                match std::mem::replace(&mut *slot, Slot::Free) {
                    Slot::Free => {}
                    Slot::Busy => {
                        *slot = Slot::Busy;
                        any_busy = true;
                        continue;
                    }
                    Slot::DoneOk(results) => self.integrate(&worker.endpoint, results),
                    Slot::DoneErr(kind, batch) => self.recover(&worker.endpoint, kind, batch),
                }
                if self.interrupt.load(Ordering::Relaxed) {
                    continue;
                }
                if let Some(order) = self.next_order() {
                    *slot = Slot::Busy;
                    any_busy = true;
                    drop(slot);
                    worker.assign(order).await;
                }
            }

            if self.done.len() + self.excluded.len() == self.total {
                break;
            }
            if self.interrupt.load(Ordering::Relaxed) && !any_busy {
                tracing::info!(
                    remaining = self.queue.len(),
                    "interrupted; leaving the rest untranslated"
                );
                break;
            }
            tokio::time::sleep(self.tick).await;
        }
        FileOutcome {
            done: self.done,
            excluded: self.excluded,
        }
    }

    /// Cut the next batch from the head of the queue. Entries whose
    /// `(source, speaker)` was already translated in this file are completed
    /// from the memo on the way.
    fn next_order(&mut self) -> Option<Order> {
        let mut batch = Vec::new();
        let mut memo_hits = false;
        while batch.len() < self.batch_size && !self.queue.is_empty() {
            let mut entry = self.queue.remove(0);
            let key = (entry.source.clone(), entry.speaker.clone());
            if let Some((target, target_speaker)) = self.memo.get(&key) {
                entry.target = Some(target.clone());
                entry.target_speaker = target_speaker.clone();
                self.done.push(entry);
                memo_hits = true;
                continue;
            }
            batch.push(entry);
        }
        if memo_hits {
            self.done.sort_by_key(|entry| entry.index);
        }
        if batch.is_empty() {
            return None;
        }
        let from = self.done.len().saturating_sub(self.history_size);
        let history = self.done[from..].to_vec();
        Some(Order { batch, history })
    }

    /// Fold a finished batch into `done` and reset the batch size.
    fn integrate(&mut self, endpoint: &str, results: Vec<Entry>) {
        for mut entry in results {
            if let Some(target) = entry.target.take() {
                entry.target = Some(glossary::apply_rewrites(&self.post_dict, &target));
            }
            if let Some(target) = &entry.target {
                self.memo
                    .entry((entry.source.clone(), entry.speaker.clone()))
                    .or_insert_with(|| (target.clone(), entry.target_speaker.clone()));
            }
            self.done.push(entry);
        }
        self.done.sort_by_key(|entry| entry.index);
        self.batch_size = self.initial_batch_size;
        tracing::debug!(
            endpoint,
            done = self.done.len(),
            total = self.total,
            "batch integrated"
        );
    }

    /// Return a failed batch to the queue, or exclude a poison entry.
    /// Only a count mismatch shrinks the batch size.
    fn recover(&mut self, endpoint: &str, kind: FailureKind, mut batch: Vec<Entry>) {
        if batch.len() == 1 && !kind.is_transport() {
            let entry = batch.remove(0);
            tracing::warn!(
                endpoint,
                index = entry.index,
                %kind,
                "excluding entry after an unrecoverable reply"
            );
            self.excluded.push(entry);
            return;
        }
        match &kind {
            FailureKind::CountMismatch { expected, got } => {
                self.batch_size = (self.batch_size / 2).max(1);
                tracing::debug!(
                    endpoint,
                    expected,
                    got,
                    batch_size = self.batch_size,
                    "count mismatch; batch size halved"
                );
            }
            FailureKind::EmptyLine => {
                tracing::debug!(endpoint, "empty line in reply; batch requeued")
            }
            FailureKind::Degeneration => {
                tracing::warn!(endpoint, "degenerate reply; batch requeued")
            }
            FailureKind::Transport(detail) => {
                tracing::warn!(endpoint, %detail, "transport failure; batch requeued")
            }
            FailureKind::TimedOut => {
                tracing::warn!(endpoint, "request timed out; batch requeued")
            }
        }
        self.queue.splice(0..0, batch);
        self.queue.sort_by_key(|entry| entry.index);
    }
}
