//! In-memory [`EmailProvider`] with deterministic cursor pagination.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use ibx_provider::{
    EmailProvider, ListThreadsQuery, Participant, ProviderError, RemoteMessage, RemoteThread,
    ThreadPage,
};

/// Deterministic provider double. Page tokens are stringified offsets into
/// the thread list, so pagination exercises the same resume/checkpoint paths
/// as a real cursor without hidden state.
#[derive(Default)]
pub struct MockProvider {
    threads: Vec<RemoteThread>,
    messages: HashMap<String, Vec<RemoteMessage>>,
    /// Threads listed but missing on individual fetch (deleted upstream).
    vanished: HashSet<String>,
    list_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread with its messages.
    pub fn with_thread(mut self, thread: RemoteThread, messages: Vec<RemoteMessage>) -> Self {
        self.messages.insert(thread.id.clone(), messages);
        self.threads.push(thread);
        self
    }

    /// Make a thread appear in listings but 404 on direct fetch.
    pub fn with_vanished(mut self, remote_thread_id: &str) -> Self {
        self.vanished.insert(remote_thread_id.to_string());
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Convenience constructors for fixtures.
    pub fn thread(id: &str, subject: &str, latest_ts: i64) -> RemoteThread {
        RemoteThread {
            id: id.to_string(),
            subject: Some(subject.to_string()),
            participants: vec![Participant {
                name: Some("Test Sender".to_string()),
                email: "sender@example.com".to_string(),
            }],
            latest_ts: Some(latest_ts),
            unread: false,
            starred: false,
        }
    }

    pub fn message(id: &str, thread_id: &str, body: &str, date: i64) -> RemoteMessage {
        RemoteMessage {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            from: vec![Participant {
                name: None,
                email: "sender@example.com".to_string(),
            }],
            to: vec![Participant {
                name: None,
                email: "support@example.com".to_string(),
            }],
            snippet: Some(body.chars().take(80).collect()),
            body: Some(body.to_string()),
            date: Some(date),
        }
    }
}

#[async_trait::async_trait]
impl EmailProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_threads(
        &self,
        _grant_id: &str,
        query: &ListThreadsQuery,
    ) -> Result<ThreadPage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let offset: usize = match &query.page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Decode(format!("bad page token: {token}")))?,
            None => 0,
        };
        let limit = query.limit.max(1) as usize;

        let filtered: Vec<RemoteThread> = self
            .threads
            .iter()
            .filter(|t| {
                let ts = t.latest_ts.unwrap_or(0);
                query.after_ts.map_or(true, |a| ts >= a)
                    && query.before_ts.map_or(true, |b| ts <= b)
            })
            .cloned()
            .collect();

        let page: Vec<RemoteThread> = filtered.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + page.len();
        let next_cursor = (next < filtered.len()).then(|| next.to_string());

        Ok(ThreadPage {
            data: page,
            next_cursor,
        })
    }

    async fn find_thread(
        &self,
        _grant_id: &str,
        remote_thread_id: &str,
    ) -> Result<Option<RemoteThread>, ProviderError> {
        if self.vanished.contains(remote_thread_id) {
            return Ok(None);
        }
        Ok(self
            .threads
            .iter()
            .find(|t| t.id == remote_thread_id)
            .cloned())
    }

    async fn list_messages(
        &self,
        _grant_id: &str,
        remote_thread_id: &str,
        limit: i32,
    ) -> Result<Vec<RemoteMessage>, ProviderError> {
        Ok(self
            .messages
            .get(remote_thread_id)
            .map(|m| m.iter().take(limit.max(0) as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_message(
        &self,
        _grant_id: &str,
        remote_message_id: &str,
    ) -> Result<Option<RemoteMessage>, ProviderError> {
        Ok(self
            .messages
            .values()
            .flatten()
            .find(|m| m.id == remote_message_id)
            .cloned())
    }
}
