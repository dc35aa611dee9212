//! Mock session provider for testing.

use crate::error::SessionError;
use crate::providers::SessionProvider;
use crate::state::{SessionGrant, TicketId};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Response = Result<SessionGrant, SessionError>;

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<TicketId, VecDeque<Response>>,
    fallback: HashMap<TicketId, Response>,
    latency: HashMap<TicketId, Duration>,
    calls: HashMap<TicketId, usize>,
}

/// Mock session provider.
///
/// Responses are scripted per ticket: queued one-shot responses are served
/// first, then the fallback set with [`MockSessionProvider::with_response`].
/// Tickets with nothing scripted get HTTP 404. Clones share the script and
/// the call counters.
#[derive(Debug, Clone, Default)]
pub struct MockSessionProvider {
    script: Arc<Mutex<Script>>,
}

impl MockSessionProvider {
    /// Create a new mock provider with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every request for `ticket_id` with `response` once the queue is empty.
    #[must_use]
    pub fn with_response(self, ticket_id: impl Into<TicketId>, response: Response) -> Self {
        self.set_response(ticket_id, response);
        self
    }

    /// Replace the fallback response for `ticket_id`.
    pub fn set_response(&self, ticket_id: impl Into<TicketId>, response: Response) {
        self.script().fallback.insert(ticket_id.into(), response);
    }

    /// Queue a one-shot response for `ticket_id`.
    pub fn push_response(&self, ticket_id: impl Into<TicketId>, response: Response) {
        self.script()
            .queued
            .entry(ticket_id.into())
            .or_default()
            .push_back(response);
    }

    /// Delay every response for `ticket_id`.
    #[must_use]
    pub fn with_latency(self, ticket_id: impl Into<TicketId>, latency: Duration) -> Self {
        self.script().latency.insert(ticket_id.into(), latency);
        self
    }

    /// Number of fetches made for `ticket_id`.
    #[must_use]
    pub fn calls(&self, ticket_id: &TicketId) -> usize {
        self.script().calls.get(ticket_id).copied().unwrap_or(0)
    }

    /// Number of fetches made for any ticket.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.script().calls.values().sum()
    }

    fn next_response(&self, ticket_id: &TicketId) -> (Response, Duration) {
        let mut script = self.script();
        *script.calls.entry(ticket_id.clone()).or_default() += 1;

        let queued = script.queued.get_mut(ticket_id).and_then(VecDeque::pop_front);
        let response = queued
            .or_else(|| script.fallback.get(ticket_id).cloned())
            .unwrap_or(Err(SessionError::Http { status: 404 }));
        let latency = script.latency.get(ticket_id).copied().unwrap_or_default();
        (response, latency)
    }
}

impl SessionProvider for MockSessionProvider {
    fn fetch_session(
        &self,
        ticket_id: &TicketId,
    ) -> impl Future<Output = Result<SessionGrant, SessionError>> + Send {
        let blank = ticket_id.is_blank();
        let scripted = (!blank).then(|| self.next_response(ticket_id));

        async move {
            let Some((response, latency)) = scripted else {
                return Err(SessionError::EmptyTicketId);
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            response
        }
    }
}
