use super::session::{Effect, Event, Notice, ReviewSession, SessionConfig};
use crate::backend::{JobId, ReviewBackend};
use crate::db::TemplateStore;
use crate::error::{ReviewError, ReviewResult};
use crate::types::{CandidateSet, TableExtraction};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Completions are tagged with the epoch of the session that asked for them.
type Completion = (u64, Event);

pub struct ReviewController<B: ReviewBackend + 'static> {
    backend: Arc<B>,
    templates: Option<Arc<TemplateStore>>,
    runtime: Handle,
    tx: UnboundedSender<Completion>,
    rx: UnboundedReceiver<Completion>,
    epoch: u64,
    outstanding: usize,
    session: Option<ReviewSession>,
    prior_applied: bool,
    saved_template: Option<i64>,
}

impl<B: ReviewBackend + 'static> ReviewController<B> {
    /// Must be called from within a tokio runtime.
    pub fn new(backend: B) -> ReviewResult<Self> {
        let runtime = Handle::try_current().map_err(|e| ReviewError::Runtime(e.to_string()))?;
        let (tx, rx) = unbounded_channel();
        Ok(Self {
            backend: Arc::new(backend),
            templates: None,
            runtime,
            tx,
            rx,
            epoch: 0,
            outstanding: 0,
            session: None,
            prior_applied: false,
            saved_template: None,
        })
    }

    /// Look up saved layouts on open and save one on finalize when asked.
    pub fn with_templates(mut self, store: Arc<TemplateStore>) -> Self {
        self.templates = Some(store);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session(&self) -> Option<&ReviewSession> {
        self.session.as_ref()
    }

    /// Row id of the template saved by the last finalize, if any.
    pub fn saved_template(&self) -> Option<i64> {
        self.saved_template
    }

    /// Start reviewing candidates already on hand. Any open session is cancelled.
    pub fn open(&mut self, job_id: JobId, table: TableExtraction, candidates: CandidateSet, config: SessionConfig) {
        self.reset();
        let session = ReviewSession::new(job_id, table, candidates, config);
        self.session = Some(session);
        self.apply_prior_layout();
    }

    /// Start a session that first asks the service to extract candidates.
    pub fn open_auto(&mut self, job_id: JobId, config: SessionConfig) {
        self.reset();
        let (session, step) = ReviewSession::awaiting_extraction(job_id, config);
        self.session = Some(session);
        for effect in step.effects {
            self.spawn(job_id, effect);
        }
    }

    pub fn dispatch(&mut self, event: Event) -> Vec<Notice> {
        let Some(session) = self.session.take() else {
            return vec![Notice::ActionUnavailable {
                action: "dispatch",
                reason: "no review session open".to_string(),
            }];
        };
        let was_closed = session.is_closed();
        let seeding = matches!(event, Event::Seeded { .. });
        let (session, step) = session.reduce(event);
        let job_id = session.job_id();
        self.session = Some(session);

        for effect in step.effects {
            self.spawn(job_id, effect);
        }
        if seeding {
            self.apply_prior_layout();
        }
        if !was_closed {
            self.save_template_if_requested();
        }
        step.notices
    }

    /// Wait for the next remote completion of the open session and apply it.
    /// `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Vec<Notice>> {
        while self.outstanding > 0 {
            let (epoch, event) = self.rx.recv().await?;
            self.outstanding -= 1;
            if epoch != self.epoch {
                tracing::debug!(epoch, current = self.epoch, "dropping completion from closed session");
                continue;
            }
            return Some(self.dispatch(event));
        }
        None
    }

    /// Apply every completion that has already arrived.
    pub fn pump(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok((epoch, event)) = self.rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            if epoch == self.epoch {
                notices.extend(self.dispatch(event));
            }
        }
        notices
    }

    /// Cancel the open session; results still in flight are discarded.
    pub fn close(&mut self) -> Vec<Notice> {
        let notices = match &self.session {
            Some(s) if !s.is_closed() => self.dispatch(Event::Cancel),
            _ => Vec::new(),
        };
        self.epoch += 1;
        notices
    }

    fn reset(&mut self) {
        self.close();
        self.session = None;
        self.prior_applied = false;
        self.saved_template = None;
    }

    fn spawn(&mut self, job_id: JobId, effect: Effect) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.outstanding += 1;
        self.runtime.spawn_blocking(move || {
            let event = run_effect(backend.as_ref(), job_id, effect);
            // Receiver gone means the controller was dropped.
            let _ = tx.send((epoch, event));
        });
    }

    fn apply_prior_layout(&mut self) {
        if self.prior_applied {
            return;
        }
        let Some(store) = &self.templates else {
            return;
        };
        match &self.session {
            Some(s) if !s.records().is_empty() => {}
            _ => return,
        }
        let Some(session) = self.session.take() else {
            return;
        };
        self.prior_applied = true;
        let key = session.template_key();
        let session = match store.find_template(&key) {
            Ok(Some(template)) => {
                tracing::info!(template = template.id, cache_key = %key.cache_key(), "using saved layout template");
                session.with_prior_layout(&template.params)
            }
            Ok(None) => session,
            Err(e) => {
                tracing::warn!(error = %e, "layout template lookup failed");
                session
            }
        };
        self.session = Some(session);
    }

    fn save_template_if_requested(&mut self) {
        let (Some(store), Some(session)) = (&self.templates, &self.session) else {
            return;
        };
        let Some(outcome) = session.outcome() else {
            return;
        };
        if !outcome.save_as_template {
            return;
        }
        let Some(params) = &outcome.learned_params else {
            tracing::warn!(job_id = session.job_id(), "no learned layout to save as template");
            return;
        };
        let key = session.template_key();
        let name = outcome
            .template_name
            .clone()
            .unwrap_or_else(|| format!("{} layout ({} columns)", key.record_type.as_str(), key.column_count));
        match store.save_template(&name, &key, params, outcome.template_id.as_deref()) {
            Ok(id) => self.saved_template = Some(id),
            Err(e) => tracing::warn!(error = %e, "saving layout template failed"),
        }
    }
}

fn run_effect<B: ReviewBackend + ?Sized>(backend: &B, job_id: JobId, effect: Effect) -> Event {
    match effect {
        Effect::AutoExtract { request } => Event::Seeded {
            request,
            result: backend.auto_extract(job_id),
        },
        Effect::Reextract { request, index, body } => Event::Reextracted {
            request,
            index,
            result: backend.reextract_row(job_id, &body),
        },
        Effect::Learn { request, body } => Event::Learned {
            request,
            result: backend.learn_from_confirmations(job_id, &body),
        },
        Effect::RejectRow { request, body } => Event::RowDiscarded {
            request,
            result: backend.reject_row(job_id, &body),
        },
        Effect::Finalize { request, body } => Event::Finalized {
            request,
            result: backend.finalize_review(job_id, &body),
        },
    }
}
