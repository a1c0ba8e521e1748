//! A mounted conversation: message store + pagination cursor + live feed.
//!
//! All store mutations happen in [`ConversationView::next_update`], called
//! from the single task that owns the view. History fetches run as spawned
//! tasks and report back over a channel; their results carry the generation
//! they were issued in so responses from before a refresh are discarded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cursor::PaginationCursor;
use super::error::{FetchError, SendError};
use super::store::MessageStore;
use crate::api::ChatApi;
use crate::live::{LiveEvent, LiveFeed, Subscription};
use crate::models::{
    DeliveryStatus, HistoryPage, Message, MessageType, OutgoingMessage, UserIdentity,
};

/// Completed history fetch.
struct PageResult {
    generation: u64,
    page: u32,
    result: anyhow::Result<HistoryPage>,
}

/// What changed after one call to [`ConversationView::next_update`].
#[derive(Debug)]
pub enum ViewUpdate {
    PageLoaded {
        page: u32,
        /// Messages new to the store
        added: usize,
        has_more: bool,
    },
    PageFailed(FetchError),
    /// A live message was inserted
    Message(Message),
    StatusChanged {
        message_id: String,
        status: DeliveryStatus,
    },
    /// Stale page, duplicate, or an event for another conversation
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Content was empty; no request was made
    SkippedEmpty,
}

pub struct ConversationView {
    conversation_id: String,
    api: Arc<dyn ChatApi>,
    identity: Option<UserIdentity>,
    page_size: u32,
    store: MessageStore,
    cursor: PaginationCursor,
    live: Option<Subscription>,
    generation: u64,
    pages_tx: mpsc::UnboundedSender<PageResult>,
    pages_rx: mpsc::UnboundedReceiver<PageResult>,
    in_flight: Option<JoinHandle<()>>,
}

impl ConversationView {
    /// Mount a view: subscribe to live events (if a feed is given) and
    /// request the first history page.
    ///
    /// A feed that cannot be subscribed degrades the view to fetch-only.
    pub fn mount(
        api: Arc<dyn ChatApi>,
        feed: Option<&Arc<LiveFeed>>,
        conversation_id: &str,
        identity: Option<UserIdentity>,
        page_size: u32,
    ) -> Self {
        let live = feed.and_then(|feed| match feed.mount(conversation_id) {
            Ok(sub) => Some(sub),
            Err(e) => {
                tracing::warn!(
                    "Live updates unavailable for {} ({}), continuing fetch-only",
                    conversation_id,
                    e
                );
                None
            }
        });

        let (pages_tx, pages_rx) = mpsc::unbounded_channel();
        let mut view = Self {
            conversation_id: conversation_id.to_string(),
            api,
            identity,
            page_size,
            store: MessageStore::new(conversation_id),
            cursor: PaginationCursor::new(),
            live,
            generation: 0,
            pages_tx,
            pages_rx,
            in_flight: None,
        };

        if let Some(page) = view.cursor.start() {
            view.spawn_fetch(page);
        }
        tracing::debug!("Mounted conversation {}", conversation_id);
        view
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    /// Whether live events are being received.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.cursor.is_loading()
    }

    /// Whether `msg` was written by the logged-in user.
    pub fn is_own(&self, msg: &Message) -> bool {
        self.identity.as_ref().is_some_and(|me| me.is_own(msg))
    }

    /// Request the next older page ("near top of list").
    ///
    /// Also retries a failed first page. Returns false if there is nothing
    /// to load or a fetch is already running.
    pub fn load_more(&mut self) -> bool {
        match self.cursor.start().or_else(|| self.cursor.next_page()) {
            Some(page) => {
                self.spawn_fetch(page);
                true
            }
            None => false,
        }
    }

    /// Reload from page 0, abandoning any fetch in flight.
    pub fn refresh(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        self.generation += 1;
        let page = self.cursor.refresh();
        self.spawn_fetch(page);
    }

    fn spawn_fetch(&mut self, page: u32) {
        let api = Arc::clone(&self.api);
        let tx = self.pages_tx.clone();
        let conversation_id = self.conversation_id.clone();
        let generation = self.generation;
        let size = self.page_size;

        tracing::debug!("Fetching page {} of {}", page, conversation_id);
        self.in_flight = Some(tokio::spawn(async move {
            let result = api.fetch_history(&conversation_id, page, size).await;
            let _ = tx.send(PageResult {
                generation,
                page,
                result,
            });
        }));
    }

    /// Wait for the next page completion or live event and apply it.
    pub async fn next_update(&mut self) -> ViewUpdate {
        tokio::select! {
            Some(done) = self.pages_rx.recv() => self.apply_page(done),
            Some(event) = recv_live(&mut self.live) => self.apply_live(event),
            else => ViewUpdate::Ignored,
        }
    }

    fn apply_page(&mut self, done: PageResult) -> ViewUpdate {
        if done.generation != self.generation {
            tracing::debug!("Discarding page {} from before refresh", done.page);
            return ViewUpdate::Ignored;
        }
        self.in_flight = None;

        match done.result {
            Ok(history) => {
                if history.number.is_some_and(|n| n != done.page) {
                    tracing::debug!(
                        "Asked for page {} of {}, server answered page {:?}",
                        done.page,
                        self.conversation_id,
                        history.number
                    );
                }
                let received = history.content.len();
                let Some(loaded) = self
                    .cursor
                    .complete(done.page, history.total_pages, received)
                else {
                    tracing::debug!("Unexpected page {}, ignored", done.page);
                    return ViewUpdate::Ignored;
                };

                let added = if done.page == 0 {
                    self.store.replace_history(history.content)
                } else {
                    self.store.prepend_history(history.content)
                };
                tracing::debug!(
                    "Conversation {} page {}/{}: {} new messages",
                    self.conversation_id,
                    done.page,
                    loaded.total_pages,
                    added
                );

                ViewUpdate::PageLoaded {
                    page: done.page,
                    added,
                    has_more: loaded.has_more,
                }
            }
            Err(e) => {
                self.cursor.fail(done.page);
                let err = FetchError::new(&self.conversation_id, done.page, e);
                tracing::warn!("{}", err);
                ViewUpdate::PageFailed(err)
            }
        }
    }

    fn apply_live(&mut self, event: LiveEvent) -> ViewUpdate {
        match event {
            LiveEvent::Message { data, .. } => {
                if data.conversation_id != self.conversation_id {
                    return ViewUpdate::Ignored;
                }
                let inserted = data.clone();
                if self.store.append_live(data) {
                    ViewUpdate::Message(inserted)
                } else {
                    ViewUpdate::Ignored
                }
            }
            LiveEvent::Status {
                conversation_id,
                message_id,
                status,
            } => {
                if conversation_id == self.conversation_id
                    && self.store.update_status(&message_id, status)
                {
                    ViewUpdate::StatusChanged { message_id, status }
                } else {
                    ViewUpdate::Ignored
                }
            }
            LiveEvent::Pong | LiveEvent::Other => ViewUpdate::Ignored,
        }
    }

    /// Send a message. Nothing is inserted locally; the message shows up
    /// through the live echo or the next fetch.
    pub async fn send(&self, content: &str, kind: MessageType) -> Result<SendOutcome, SendError> {
        if content.trim().is_empty() {
            return Ok(SendOutcome::SkippedEmpty);
        }

        let outgoing = OutgoingMessage::new(&self.conversation_id, content, kind);
        self.api
            .send_message(&outgoing)
            .await
            .map_err(|e| SendError::new(&self.conversation_id, e))?;
        Ok(SendOutcome::Sent)
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        tracing::debug!("Unmounted conversation {}", self.conversation_id);
    }
}

async fn recv_live(live: &mut Option<Subscription>) -> Option<LiveEvent> {
    match live {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    use crate::conversation::store::tests::msg;
    use crate::models::ChatRoom;

    enum Scripted {
        Page(HistoryPage),
        Fail(&'static str),
        Gated(oneshot::Receiver<HistoryPage>),
    }

    #[derive(Default)]
    struct FakeApi {
        responses: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<(String, u32, u32)>>,
        sent: Mutex<Vec<OutgoingMessage>>,
        fail_sends: bool,
    }

    impl FakeApi {
        fn scripted(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            })
        }

        fn requested_pages(&self) -> Vec<u32> {
            self.requests.lock().unwrap().iter().map(|r| r.1).collect()
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn fetch_history(&self, room_id: &str, page: u32, size: u32) -> Result<HistoryPage> {
            self.requests
                .lock()
                .unwrap()
                .push((room_id.to_string(), page, size));
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Page(p)) => Ok(p),
                Some(Scripted::Fail(reason)) => Err(anyhow!(reason)),
                Some(Scripted::Gated(rx)) => rx.await.map_err(|_| anyhow!("gate dropped")),
                None => Err(anyhow!("no response scripted")),
            }
        }

        async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
            if self.fail_sends {
                return Err(anyhow!("HTTP 500"));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn list_rooms(&self) -> Result<Vec<ChatRoom>> {
            Ok(Vec::new())
        }

        async fn mark_read(&self, _room_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn page(content: Vec<Message>, total_pages: u32) -> Scripted {
        Scripted::Page(HistoryPage {
            content,
            total_pages,
            number: None,
        })
    }

    fn ids(view: &ConversationView) -> Vec<String> {
        view.store().messages().map(|m| m.id.clone()).collect()
    }

    fn live_message(m: Message) -> LiveEvent {
        LiveEvent::Message {
            conversation_id: m.conversation_id.clone(),
            data: m,
        }
    }

    fn offline_feed() -> Arc<LiveFeed> {
        LiveFeed::new("ws://127.0.0.1:9/ws/chat", "tok").unwrap()
    }

    #[tokio::test]
    async fn test_first_page_reversed_with_more() {
        let api = FakeApi::scripted(vec![page(vec![msg("c", "B", 2), msg("c", "A", 1)], 2)]);
        let mut view = ConversationView::mount(api.clone(), None, "c", None, 50);

        match view.next_update().await {
            ViewUpdate::PageLoaded {
                page,
                added,
                has_more,
            } => {
                assert_eq!(page, 0);
                assert_eq!(added, 2);
                assert!(has_more);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(ids(&view), vec!["A", "B"]);
        assert_eq!(
            api.requests.lock().unwrap().as_slice(),
            &[("c".to_string(), 0, 50)]
        );
    }

    #[tokio::test]
    async fn test_older_page_goes_before_first() {
        let api = FakeApi::scripted(vec![
            page(vec![msg("c", "D", 4), msg("c", "C", 3)], 2),
            page(vec![msg("c", "B", 2), msg("c", "A", 1)], 2),
        ]);
        let mut view = ConversationView::mount(api.clone(), None, "c", None, 2);
        view.next_update().await;

        assert!(view.load_more());
        assert!(!view.load_more());
        match view.next_update().await {
            ViewUpdate::PageLoaded { page, has_more, .. } => {
                assert_eq!(page, 1);
                assert!(!has_more);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(ids(&view), vec!["A", "B", "C", "D"]);
        assert!(!view.load_more());
        assert_eq!(api.requested_pages(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_failed_page_leaves_store_and_is_retryable() {
        let api = FakeApi::scripted(vec![
            page(vec![msg("c", "B", 2), msg("c", "A", 1)], 3),
            Scripted::Fail("connection reset"),
            page(vec![msg("c", "Z", 0)], 3),
        ]);
        let mut view = ConversationView::mount(api.clone(), None, "c", None, 2);
        view.next_update().await;

        view.load_more();
        match view.next_update().await {
            ViewUpdate::PageFailed(err) => assert_eq!(err.page, 1),
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(ids(&view), vec!["A", "B"]);
        assert!(view.cursor().has_more());

        assert!(view.load_more());
        view.next_update().await;
        assert_eq!(ids(&view), vec!["Z", "A", "B"]);
        assert_eq!(api.requested_pages(), vec![0, 1, 1]);
    }

    #[tokio::test]
    async fn test_failed_first_page_retried_by_load_more() {
        let api = FakeApi::scripted(vec![
            Scripted::Fail("503"),
            page(vec![msg("c", "A", 1)], 1),
        ]);
        let mut view = ConversationView::mount(api.clone(), None, "c", None, 50);
        assert!(matches!(view.next_update().await, ViewUpdate::PageFailed(_)));
        assert!(view.store().is_empty());

        assert!(view.load_more());
        view.next_update().await;
        assert_eq!(ids(&view), vec!["A"]);
        assert_eq!(api.requested_pages(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_live_messages_filtered_and_deduplicated() {
        let feed = offline_feed();
        let api = FakeApi::scripted(vec![page(vec![msg("c", "B", 2), msg("c", "A", 1)], 1)]);
        let mut view = ConversationView::mount(api, Some(&feed), "c", None, 50);
        assert!(view.is_live());
        view.next_update().await;

        feed.inject(&live_message(msg("other", "X", 9)));
        assert!(matches!(view.next_update().await, ViewUpdate::Ignored));

        feed.inject(&live_message(msg("c", "C", 3)));
        match view.next_update().await {
            ViewUpdate::Message(m) => assert_eq!(m.id, "C"),
            other => panic!("unexpected update: {:?}", other),
        }

        // Echo of a message already fetched.
        feed.inject(&live_message(msg("c", "B", 2)));
        assert!(matches!(view.next_update().await, ViewUpdate::Ignored));

        assert_eq!(ids(&view), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_status_event_updates_message() {
        let feed = offline_feed();
        let api = FakeApi::scripted(vec![page(vec![msg("c", "A", 1)], 1)]);
        let mut view = ConversationView::mount(api, Some(&feed), "c", None, 50);
        view.next_update().await;

        feed.inject(&LiveEvent::Status {
            conversation_id: "c".into(),
            message_id: "A".into(),
            status: DeliveryStatus::Read,
        });
        match view.next_update().await {
            ViewUpdate::StatusChanged { message_id, status } => {
                assert_eq!(message_id, "A");
                assert_eq!(status, DeliveryStatus::Read);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(view.store().get("A").unwrap().status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn test_live_message_survives_empty_first_page() {
        let feed = offline_feed();
        let (gate_tx, gate_rx) = oneshot::channel();
        let api = FakeApi::scripted(vec![Scripted::Gated(gate_rx)]);
        let mut view = ConversationView::mount(api, Some(&feed), "c", None, 50);

        // First message of a new room echoes back before its history page.
        feed.inject(&live_message(msg("c", "FIRST", 1)));
        assert!(matches!(view.next_update().await, ViewUpdate::Message(_)));

        gate_tx
            .send(HistoryPage {
                content: Vec::new(),
                total_pages: 0,
                number: Some(0),
            })
            .unwrap();
        match view.next_update().await {
            ViewUpdate::PageLoaded {
                page,
                added,
                has_more,
            } => {
                assert_eq!(page, 0);
                assert_eq!(added, 0);
                assert!(!has_more);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(ids(&view), vec!["FIRST"]);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let api = FakeApi::scripted(vec![page(vec![msg("c", "A", 1)], 1)]);
        let mut view = ConversationView::mount(api, None, "c", None, 50);
        view.next_update().await;
        view.generation += 1;

        let update = view.apply_page(PageResult {
            generation: view.generation - 1,
            page: 0,
            result: Ok(HistoryPage {
                content: vec![msg("c", "Q", 5)],
                total_pages: 1,
                number: Some(0),
            }),
        });
        assert!(matches!(update, ViewUpdate::Ignored));
        assert_eq!(ids(&view), vec!["A"]);
    }

    #[tokio::test]
    async fn test_refresh_abandons_in_flight_page() {
        let (gate_tx, gate_rx) = oneshot::channel();
        let api = FakeApi::scripted(vec![
            page(vec![msg("c", "B", 2)], 3),
            Scripted::Gated(gate_rx),
            page(vec![msg("c", "C", 3), msg("c", "B", 2)], 3),
        ]);
        let mut view = ConversationView::mount(api.clone(), None, "c", None, 1);
        view.next_update().await;

        assert!(view.load_more());
        while api.requested_pages().len() < 2 {
            tokio::task::yield_now().await;
        }
        view.refresh();
        assert!(!view.cursor().has_more());

        match view.next_update().await {
            ViewUpdate::PageLoaded { page, .. } => assert_eq!(page, 0),
            other => panic!("unexpected update: {:?}", other),
        }
        // The old page-1 response never lands.
        let _ = gate_tx.send(HistoryPage {
            content: vec![msg("c", "OLD", 0)],
            total_pages: 3,
            number: Some(1),
        });
        assert_eq!(ids(&view), vec!["B", "C"]);
        assert_eq!(view.cursor().loaded_page(), Some(0));
    }

    #[tokio::test]
    async fn test_unmount_releases_feed_and_abandons_fetch() {
        let feed = offline_feed();
        let (mut gate_tx, gate_rx) = oneshot::channel();
        let api = FakeApi::scripted(vec![Scripted::Gated(gate_rx)]);

        let view = ConversationView::mount(api, Some(&feed), "c", None, 50);
        assert_eq!(feed.handler_count(), 1);
        tokio::task::yield_now().await;

        drop(view);
        assert_eq!(feed.handler_count(), 0);

        // The fetch task is aborted, so nobody is left to receive the page.
        tokio::time::timeout(Duration::from_secs(1), gate_tx.closed())
            .await
            .expect("in-flight fetch was not abandoned");
    }

    #[tokio::test]
    async fn test_shut_down_feed_degrades_to_fetch_only() {
        let feed = offline_feed();
        feed.shutdown();
        let api = FakeApi::scripted(vec![page(vec![msg("c", "A", 1)], 1)]);
        let mut view = ConversationView::mount(api, Some(&feed), "c", None, 50);
        assert!(!view.is_live());
        assert!(matches!(
            view.next_update().await,
            ViewUpdate::PageLoaded { .. }
        ));
    }

    #[tokio::test]
    async fn test_send_empty_is_noop() {
        let api = FakeApi::scripted(vec![]);
        let view = ConversationView::mount(api.clone(), None, "c", None, 50);

        let outcome = view.send("   \n", MessageType::Text).await.unwrap();
        assert_eq!(outcome, SendOutcome::SkippedEmpty);
        assert!(api.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_does_not_insert_locally() {
        let api = FakeApi::scripted(vec![page(vec![], 0)]);
        let mut view = ConversationView::mount(api.clone(), None, "c", None, 50);
        view.next_update().await;

        let outcome = assert_ok!(view.send("881", MessageType::CarReference).await);
        assert_eq!(outcome, SendOutcome::Sent);
        assert!(view.store().is_empty());

        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].conversation_id, "c");
        assert_eq!(sent[0].message_type, MessageType::CarReference);
    }

    #[tokio::test]
    async fn test_send_failure_reported() {
        let api = Arc::new(FakeApi {
            fail_sends: true,
            ..Default::default()
        });
        let view = ConversationView::mount(api, None, "c", None, 50);
        let err = assert_err!(view.send("hello", MessageType::Text).await);
        assert_eq!(err.conversation_id, "c");
    }

    #[tokio::test]
    async fn test_is_own_uses_identity() {
        let api = FakeApi::scripted(vec![]);
        let me = UserIdentity {
            id: "1".into(),
            username: "seller".into(),
            display_name: None,
        };
        let view = ConversationView::mount(api.clone(), None, "c", Some(me), 50);
        assert!(view.is_own(&msg("c", "A", 1)));

        let anonymous = ConversationView::mount(api, None, "c", None, 50);
        assert!(!anonymous.is_own(&msg("c", "A", 1)));
    }
}
