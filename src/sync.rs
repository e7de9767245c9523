//! Contact sync controller.
//!
//! Reconciles the paged remote feed, the local cache, connectivity and the
//! live search filter into a single visible contact list.
//!
//! All state lives on the task that owns the controller. Remote fetches run on
//! spawned tasks and report back through a channel; the owner applies each
//! [`FetchCompletion`] with [`ContactSyncController::handle_completion`] (or
//! [`ContactSyncController::settle`]), so the lists are never touched
//! concurrently and no locks are needed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::connectivity::Connectivity;
use crate::contact::{Contact, PageEnvelope};
use crate::db::ContactStore;
use crate::error::SyncError;
use crate::remote::{PageFetcher, PageRequest};
use crate::search;

/// Notifications published to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// `contacts()` or `filtered_contacts()` may have changed.
    DataChanged,
    LoadingChanged(bool),
    Error(SyncError),
}

/// Result of one remote fetch, delivered back to the owning task.
#[derive(Debug)]
pub struct FetchCompletion {
    generation: u64,
    request: PageRequest,
    result: Result<PageEnvelope, SyncError>,
}

#[derive(Debug, Default)]
struct SyncState {
    all_contacts: Vec<Contact>,
    /// email -> index into `all_contacts`
    positions: HashMap<String, usize>,
    filtered_contacts: Vec<Contact>,
    current_page: u32,
    /// Next cache row to read when paging offline.
    cache_offset: usize,
    is_loading: bool,
    has_more_data: bool,
    search_term: String,
}

pub struct ContactSyncController {
    fetcher: Arc<dyn PageFetcher>,
    store: Box<dyn ContactStore>,
    connectivity: Arc<dyn Connectivity>,
    settings: SyncSettings,
    state: SyncState,
    /// Bumped on every reset; completions from an older generation are dropped.
    generation: u64,
    /// Generation of the fetch that set `is_loading`.
    in_flight: Option<u64>,
    completions_tx: mpsc::UnboundedSender<FetchCompletion>,
    completions_rx: mpsc::UnboundedReceiver<FetchCompletion>,
    listeners: Vec<mpsc::UnboundedSender<SyncEvent>>,
}

impl ContactSyncController {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Box<dyn ContactStore>,
        connectivity: Arc<dyn Connectivity>,
        settings: SyncSettings,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            store,
            connectivity,
            settings,
            state: SyncState {
                has_more_data: true,
                ..SyncState::default()
            },
            generation: 0,
            in_flight: None,
            completions_tx,
            completions_rx,
            listeners: Vec::new(),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.state.all_contacts
    }

    pub fn filtered_contacts(&self) -> &[Contact] {
        &self.state.filtered_contacts
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading
    }

    pub fn has_more_data(&self) -> bool {
        self.state.has_more_data
    }

    pub fn current_page(&self) -> u32 {
        self.state.current_page
    }

    pub fn search_term(&self) -> &str {
        &self.state.search_term
    }

    pub fn store(&self) -> &dyn ContactStore {
        self.store.as_ref()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Start over: show the first cache window right away, then fetch page 0
    /// if online. No-op while a fetch is in flight.
    pub fn load_initial(&mut self) {
        if self.state.is_loading {
            debug!("load_initial ignored, fetch in flight");
            return;
        }

        self.reset();
        self.state.search_term.clear();

        let cached = self.read_cache_window(0, self.settings.page_size);
        debug!(count = cached.len(), "initial cache window");
        self.state.cache_offset = cached.len();
        self.merge(cached);
        self.recompute_filter();
        self.publish(SyncEvent::DataChanged);

        if self.connectivity.is_online() {
            self.start_remote_fetch();
        }
    }

    /// Called by the presentation with the index of the row about to be shown.
    pub fn load_more_if_needed(&mut self, current_index: usize) {
        if self.state.is_loading || !self.state.has_more_data {
            return;
        }
        let visible = self.state.filtered_contacts.len();
        if current_index.saturating_add(self.settings.load_more_threshold) < visible {
            return;
        }

        if self.connectivity.is_online() {
            self.start_remote_fetch();
            return;
        }

        // Remote pages merged earlier may already hold some cache rows; skip
        // windows that bring nothing new.
        loop {
            let offset = self.state.cache_offset;
            let window = self.read_cache_window(offset, self.settings.page_size);
            debug!(offset, count = window.len(), "offline cache window");
            if window.is_empty() {
                return;
            }
            self.state.cache_offset += window.len();

            let before = self.state.all_contacts.len();
            self.merge(window);
            if self.state.all_contacts.len() > before {
                break;
            }
        }
        self.recompute_filter();
        self.publish(SyncEvent::DataChanged);
    }

    pub fn refresh(&mut self) {
        if !self.connectivity.is_online() {
            info!("refresh while offline, reloading from cache");
            self.publish(SyncEvent::Error(SyncError::Offline));

            let limit = self.settings.page_size.max(self.state.all_contacts.len());
            let cached = self.read_cache_window(0, limit);
            self.state.cache_offset = cached.len();
            self.replace_contacts(cached);
            self.recompute_filter();
            self.publish(SyncEvent::DataChanged);
            return;
        }

        if self.state.is_loading {
            debug!("refresh ignored, fetch in flight");
            return;
        }

        self.reset();
        self.start_remote_fetch();
    }

    pub fn filter(&mut self, text: &str) {
        self.state.search_term = search::normalize_query(text).unwrap_or_default();
        self.recompute_filter();
        self.publish(SyncEvent::DataChanged);
    }

    pub fn on_connectivity_restored(&mut self) {
        if self.state.all_contacts.is_empty() {
            info!("connectivity restored with an empty list, reloading");
            self.load_initial();
        }
    }

    // =========================================================================
    // Completion handling
    // =========================================================================

    /// Next fetch completion. Never resolves while nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<FetchCompletion> {
        self.completions_rx.recv().await
    }

    /// Apply fetch completions until no fetch is in flight.
    pub async fn settle(&mut self) {
        while self.state.is_loading {
            match self.completions_rx.recv().await {
                Some(completion) => self.handle_completion(completion),
                None => break,
            }
        }
    }

    pub fn handle_completion(&mut self, completion: FetchCompletion) {
        if completion.generation != self.generation {
            debug!(
                stale = completion.generation,
                current = self.generation,
                "discarding stale fetch completion"
            );
            // Reset without a new fetch: this was the one holding the flag.
            if self.in_flight == Some(completion.generation) {
                self.finish_loading();
            }
            return;
        }

        self.finish_loading();

        match completion.result {
            Ok(page) => self.apply_page(completion.request, page),
            Err(err) => {
                warn!(error = %err, page = completion.request.page, "page fetch failed");
                if err.wants_cache_fallback() && self.state.all_contacts.is_empty() {
                    let cached = self.read_cache_window(0, self.settings.page_size);
                    self.state.cache_offset = cached.len();
                    if !cached.is_empty() {
                        self.merge(cached);
                        self.recompute_filter();
                        self.publish(SyncEvent::DataChanged);
                    }
                }
                self.publish(SyncEvent::Error(err));
            }
        }
    }

    fn apply_page(&mut self, request: PageRequest, page: PageEnvelope) {
        let returned = page.results.len();

        for contact in &page.results {
            if let Err(e) = self.store.upsert_contact(contact) {
                warn!(email = %contact.email, "failed to cache contact: {:#}", e);
            }
        }

        self.merge(page.results);
        self.state.has_more_data = returned >= request.results;
        self.state.current_page = request.page + 1;
        info!(
            page = request.page,
            seed = %page.info.seed,
            version = %page.info.version,
            returned,
            total = self.state.all_contacts.len(),
            has_more = self.state.has_more_data,
            "merged page"
        );

        self.recompute_filter();
        self.publish(SyncEvent::DataChanged);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn start_remote_fetch(&mut self) {
        let request = PageRequest {
            results: self.settings.page_size,
            page: self.state.current_page,
        };
        self.state.is_loading = true;
        self.in_flight = Some(self.generation);
        self.publish(SyncEvent::LoadingChanged(true));
        debug!(page = request.page, results = request.results, "dispatching fetch");

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = fetcher.fetch_page(request).await;
            // The receiver lives in the controller; a send error means it is gone.
            let _ = tx.send(FetchCompletion {
                generation,
                request,
                result,
            });
        });
    }

    fn finish_loading(&mut self) {
        self.state.is_loading = false;
        self.in_flight = None;
        self.publish(SyncEvent::LoadingChanged(false));
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.state.current_page = 0;
        self.state.cache_offset = 0;
        self.state.has_more_data = true;
        self.state.all_contacts.clear();
        self.state.positions.clear();
        self.state.filtered_contacts.clear();
    }

    /// Insert new identities at the end, replace known ones in place.
    fn merge(&mut self, incoming: Vec<Contact>) {
        for contact in incoming {
            match self.state.positions.get(&contact.email) {
                Some(&index) => self.state.all_contacts[index] = contact,
                None => {
                    self.state
                        .positions
                        .insert(contact.email.clone(), self.state.all_contacts.len());
                    self.state.all_contacts.push(contact);
                }
            }
        }
    }

    fn replace_contacts(&mut self, contacts: Vec<Contact>) {
        self.state.all_contacts.clear();
        self.state.positions.clear();
        self.merge(contacts);
    }

    fn recompute_filter(&mut self) {
        self.state.filtered_contacts =
            search::filter_contacts(&self.state.all_contacts, &self.state.search_term);
    }

    fn read_cache_window(&self, offset: usize, limit: usize) -> Vec<Contact> {
        match self.store.fetch_window(offset, limit) {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!(offset, limit, "failed to read cache window: {:#}", e);
                Vec::new()
            }
        }
    }

    fn publish(&mut self, event: SyncEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivitySignal;
    use crate::contact::fixtures::{contact, page};
    use crate::db::{CachedContact, Database};
    use crate::error::DecodeErrorKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves queued responses in order and records every request it sees.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<PageEnvelope, SyncError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedFetcher {
        fn push(&self, response: Result<PageEnvelope, SyncError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(&self, request: PageRequest) -> Result<PageEnvelope, SyncError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SyncError::Transport("no scripted response".into())))
        }
    }

    /// Store whose writes always fail; reads delegate to an in-memory database.
    struct ReadOnlyStore(Database);

    impl ContactStore for ReadOnlyStore {
        fn upsert_contact(&mut self, _contact: &Contact) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
        fn fetch_window(&self, offset: usize, limit: usize) -> anyhow::Result<Vec<Contact>> {
            self.0.fetch_window(offset, limit)
        }
        fn search(&self, query: &str) -> anyhow::Result<Vec<Contact>> {
            self.0.search(query)
        }
        fn get_contact(&self, email: &str) -> anyhow::Result<Option<CachedContact>> {
            self.0.get_contact(email)
        }
        fn count(&self) -> anyhow::Result<usize> {
            self.0.count()
        }
        fn clear_all(&mut self) -> anyhow::Result<()> {
            self.0.clear_all()
        }
    }

    struct Harness {
        controller: ContactSyncController,
        fetcher: Arc<ScriptedFetcher>,
        signal: ConnectivitySignal,
        events: mpsc::UnboundedReceiver<SyncEvent>,
    }

    impl Harness {
        fn drain(&mut self) -> Vec<SyncEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn harness_with(store: Box<dyn ContactStore>, online: bool, page_size: usize) -> Harness {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let signal = ConnectivitySignal::new(online);
        let mut controller = ContactSyncController::new(
            fetcher.clone(),
            store,
            Arc::new(signal.clone()),
            SyncSettings {
                page_size,
                load_more_threshold: 15,
            },
        );
        let events = controller.subscribe();
        Harness {
            controller,
            fetcher,
            signal,
            events,
        }
    }

    fn harness(online: bool, page_size: usize) -> Harness {
        harness_with(Box::new(Database::open_in_memory().unwrap()), online, page_size)
    }

    fn cached_store(contacts: &[Contact]) -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.import(contacts).unwrap();
        db
    }

    fn emails(contacts: &[Contact]) -> Vec<String> {
        contacts.iter().map(|c| c.email.clone()).collect()
    }

    #[tokio::test]
    async fn test_two_pages_scenario() {
        let mut h = harness(true, 50);
        h.fetcher.push(Ok(page("A", 50, 0)));
        h.fetcher.push(Ok(page("B", 23, 1)));

        h.controller.load_initial();
        assert!(h.controller.is_loading());
        h.controller.settle().await;

        assert!(h.controller.has_more_data());
        assert_eq!(h.controller.current_page(), 1);
        assert_eq!(h.controller.contacts().len(), 50);

        h.controller.load_more_if_needed(49);
        h.controller.settle().await;

        assert!(!h.controller.has_more_data());
        assert_eq!(h.controller.current_page(), 2);
        assert_eq!(h.controller.contacts().len(), 73);
        assert_eq!(
            h.fetcher.requests(),
            vec![
                PageRequest { results: 50, page: 0 },
                PageRequest { results: 50, page: 1 },
            ]
        );

        // Exhausted feed: no further fetches.
        h.controller.load_more_if_needed(72);
        assert!(!h.controller.is_loading());
        assert_eq!(h.fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_page_is_written_to_cache() {
        let mut h = harness(true, 10);
        h.fetcher.push(Ok(page("A", 10, 0)));
        h.controller.load_initial();
        h.controller.settle().await;

        assert_eq!(h.controller.store().count().unwrap(), 10);
        assert!(h.controller.store().get_contact("a.3@example.com").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_more_is_single_flight() {
        let mut h = harness(true, 10);
        h.fetcher.push(Ok(page("A", 10, 0)));
        h.fetcher.push(Ok(page("B", 10, 1)));
        h.controller.load_initial();
        h.controller.settle().await;
        h.drain();

        for index in 0..10 {
            h.controller.load_more_if_needed(index);
        }
        h.controller.load_initial();
        h.controller.refresh();
        h.controller.settle().await;

        assert_eq!(h.fetcher.requests().len(), 2);
        assert_eq!(h.controller.contacts().len(), 20);
        let loading: Vec<_> = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::LoadingChanged(_)))
            .collect();
        assert_eq!(
            loading,
            vec![SyncEvent::LoadingChanged(true), SyncEvent::LoadingChanged(false)]
        );
    }

    #[tokio::test]
    async fn test_load_more_respects_threshold() {
        let mut h = harness(true, 40);
        h.fetcher.push(Ok(page("A", 40, 0)));
        h.controller.load_initial();
        h.controller.settle().await;

        // 40 rows, threshold 15: index 25 is the first one close enough.
        h.controller.load_more_if_needed(10);
        h.controller.load_more_if_needed(24);
        assert!(!h.controller.is_loading());
        h.controller.load_more_if_needed(25);
        assert!(h.controller.is_loading());
    }

    #[tokio::test]
    async fn test_initial_load_shows_cache_then_merges_remote() {
        let cached = vec![
            contact("Amy", "Clark", "a.0@example.com"),
            contact("Old", "Entry", "old@example.com"),
        ];
        let mut h = harness_with(Box::new(cached_store(&cached)), true, 5);
        let mut remote = page("A", 5, 0);
        remote.results[0].phone = "fresh".into();
        h.fetcher.push(Ok(remote));

        h.controller.load_initial();
        // Cache window is visible before the fetch resolves.
        assert_eq!(h.controller.contacts().len(), 2);
        assert_eq!(h.drain()[0], SyncEvent::DataChanged);

        h.controller.settle().await;
        let contacts = h.controller.contacts();
        // a.0 replaced in place, four new identities appended, no duplicates.
        assert_eq!(contacts.len(), 6);
        assert_eq!(contacts[0].email, "a.0@example.com");
        assert_eq!(contacts[0].phone, "fresh");
        assert_eq!(contacts[1].email, "old@example.com");
    }

    #[tokio::test]
    async fn test_offline_initial_load_reads_cache_only() {
        let cached: Vec<_> = page("C", 8, 0).results;
        let mut h = harness_with(Box::new(cached_store(&cached)), false, 5);

        h.controller.load_initial();
        assert!(!h.controller.is_loading());
        assert_eq!(h.controller.contacts().len(), 5);

        // Offline paging walks the cache.
        h.controller.load_more_if_needed(4);
        assert_eq!(h.controller.contacts().len(), 8);
        h.controller.load_more_if_needed(7);
        assert_eq!(h.controller.contacts().len(), 8);
        assert!(h.fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_filter_semantics() {
        let mut h = harness(true, 3);
        let mut envelope = page("A", 3, 0);
        envelope.results[0].name.first = "Amélie".into();
        envelope.results[1].email = "AMELIE.work@example.com".into();
        h.fetcher.push(Ok(envelope));
        h.controller.load_initial();
        h.controller.settle().await;
        h.drain();

        h.controller.filter("  AMÉLIE ");
        assert_eq!(h.controller.search_term(), "amélie");
        assert_eq!(h.controller.filtered_contacts().len(), 1);
        assert_eq!(h.controller.filtered_contacts()[0].name.first, "Amélie");

        h.controller.filter("amelie");
        assert_eq!(emails(h.controller.filtered_contacts()), vec!["AMELIE.work@example.com"]);

        h.controller.filter("nobody");
        assert!(h.controller.filtered_contacts().is_empty());

        h.controller.filter("");
        assert_eq!(h.controller.filtered_contacts(), h.controller.contacts());

        // Every filter call publishes, even for an empty result.
        assert_eq!(h.drain(), vec![SyncEvent::DataChanged; 4]);
    }

    #[tokio::test]
    async fn test_filter_applies_to_pages_merged_later() {
        let mut h = harness(true, 3);
        h.fetcher.push(Ok(page("A", 3, 0)));
        h.fetcher.push(Ok(page("B", 3, 1)));
        h.controller.load_initial();
        h.controller.settle().await;

        h.controller.filter("b1");
        assert!(h.controller.filtered_contacts().is_empty());

        h.controller.load_more_if_needed(0);
        h.controller.settle().await;
        assert_eq!(emails(h.controller.filtered_contacts()), vec!["b.1@example.com"]);
    }

    #[tokio::test]
    async fn test_load_initial_clears_search_term() {
        let mut h = harness(false, 3);
        h.controller.filter("amy");
        h.controller.load_initial();
        assert_eq!(h.controller.search_term(), "");
    }

    #[tokio::test]
    async fn test_refresh_online_resets_pagination() {
        let mut h = harness(true, 5);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.fetcher.push(Ok(page("A", 2, 1)));
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.controller.load_initial();
        h.controller.settle().await;
        h.controller.load_more_if_needed(4);
        h.controller.settle().await;
        assert!(!h.controller.has_more_data());
        assert_eq!(h.controller.current_page(), 2);

        h.controller.refresh();
        assert_eq!(h.controller.current_page(), 0);
        assert!(h.controller.has_more_data());
        assert!(h.controller.contacts().is_empty());
        h.controller.settle().await;

        assert_eq!(h.fetcher.requests()[2], PageRequest { results: 5, page: 0 });
        assert_eq!(h.controller.current_page(), 1);
        let seen: std::collections::HashSet<_> = emails(h.controller.contacts()).into_iter().collect();
        assert_eq!(h.controller.contacts().len(), 5);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_refresh_offline_publishes_offline_and_reads_cache() {
        let cached = page("C", 4, 0).results;
        let mut h = harness_with(Box::new(cached_store(&cached)), false, 10);
        h.controller.filter("c2");
        h.drain();

        h.controller.refresh();

        assert!(h.fetcher.requests().is_empty());
        assert!(!h.controller.is_loading());
        let events = h.drain();
        assert_eq!(
            events,
            vec![SyncEvent::Error(SyncError::Offline), SyncEvent::DataChanged]
        );
        assert_eq!(h.controller.contacts().len(), 4);
        assert_eq!(emails(h.controller.filtered_contacts()), vec!["c.2@example.com"]);
    }

    #[tokio::test]
    async fn test_decode_failure_leaves_contacts_unchanged() {
        let mut h = harness(true, 5);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.fetcher.push(Err(SyncError::Decode {
            kind: DecodeErrorKind::TypeMismatch,
            message: "invalid type".into(),
        }));
        h.controller.load_initial();
        h.controller.settle().await;
        let before = h.controller.contacts().to_vec();
        h.drain();

        h.controller.load_more_if_needed(4);
        h.controller.settle().await;

        assert!(!h.controller.is_loading());
        assert_eq!(h.controller.contacts(), before.as_slice());
        assert_eq!(h.controller.current_page(), 1);
        let events = h.drain();
        assert_eq!(events[0], SyncEvent::LoadingChanged(true));
        assert_eq!(events[1], SyncEvent::LoadingChanged(false));
        assert!(matches!(
            events[2],
            SyncEvent::Error(SyncError::Decode {
                kind: DecodeErrorKind::TypeMismatch,
                ..
            })
        ));

        // Still usable: the next attempt asks for the same page again.
        h.fetcher.push(Ok(page("B", 5, 1)));
        h.controller.load_more_if_needed(4);
        h.controller.settle().await;
        assert_eq!(h.controller.contacts().len(), 10);
        assert_eq!(h.fetcher.requests()[2].page, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_with_empty_list_falls_back_to_cache() {
        let mut h = harness_with(Box::new(Database::open_in_memory().unwrap()), true, 5);
        h.fetcher.push(Err(SyncError::Transport("connection reset".into())));

        // Empty cache at load time; rows appear before the failure lands.
        h.controller.load_initial();
        h.drain();
        assert!(h.controller.contacts().is_empty());

        let mut db = Database::open_in_memory().unwrap();
        db.import(&page("C", 3, 0).results).unwrap();
        h.controller.store = Box::new(db);

        h.controller.settle().await;
        assert_eq!(h.controller.contacts().len(), 3);
        let events = h.drain();
        assert_eq!(
            events,
            vec![
                SyncEvent::LoadingChanged(false),
                SyncEvent::DataChanged,
                SyncEvent::Error(SyncError::Transport("connection reset".into())),
            ]
        );
    }

    #[tokio::test]
    async fn test_cache_write_failure_does_not_block_publish() {
        let store = ReadOnlyStore(Database::open_in_memory().unwrap());
        let mut h = harness_with(Box::new(store), true, 4);
        h.fetcher.push(Ok(page("A", 4, 0)));

        h.controller.load_initial();
        h.controller.settle().await;

        assert_eq!(h.controller.contacts().len(), 4);
        let events = h.drain();
        assert!(!events.iter().any(|e| matches!(e, SyncEvent::Error(_))));
        assert_eq!(events.last(), Some(&SyncEvent::DataChanged));
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let mut h = harness(true, 5);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.controller.load_initial();
        let stale = h.controller.next_completion().await.unwrap();

        // Reset while the fetch is still in flight, without starting another.
        h.controller.reset();
        h.drain();
        h.controller.handle_completion(stale);

        assert!(h.controller.contacts().is_empty());
        assert_eq!(h.controller.current_page(), 0);
        assert!(!h.controller.is_loading());
        assert_eq!(h.drain(), vec![SyncEvent::LoadingChanged(false)]);
    }

    #[tokio::test]
    async fn test_stale_completion_keeps_newer_fetch_loading() {
        let mut h = harness(true, 5);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.fetcher.push(Ok(page("B", 5, 0)));
        h.controller.load_initial();
        let stale = h.controller.next_completion().await.unwrap();

        h.controller.reset();
        h.controller.start_remote_fetch();
        h.drain();
        h.controller.handle_completion(stale);
        assert!(h.controller.is_loading());
        assert!(h.drain().is_empty());

        h.controller.settle().await;
        assert_eq!(h.controller.contacts()[0].email, "b.0@example.com");
    }

    #[tokio::test]
    async fn test_out_of_range_index_triggers_load_more() {
        let mut h = harness(true, 5);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.controller.load_initial();
        h.controller.settle().await;

        h.controller.load_more_if_needed(usize::MAX);
        assert!(h.controller.is_loading());
    }

    #[tokio::test]
    async fn test_offline_paging_reaches_cache_rows_behind_remote_pages() {
        let early: Vec<_> = (0..10)
            .map(|i| {
                contact(
                    &format!("Early{}", i),
                    &format!("Aaa{:02}", i),
                    &format!("early{}@example.com", i),
                )
            })
            .collect();
        let mut h = harness_with(Box::new(cached_store(&early)), true, 5);
        h.fetcher.push(Ok(page("Z", 5, 0)));

        h.controller.load_initial();
        h.controller.settle().await;
        assert_eq!(h.controller.contacts().len(), 10);
        assert_eq!(h.controller.store().count().unwrap(), 15);

        h.signal.set_online(false);
        h.controller.load_more_if_needed(9);
        assert_eq!(h.controller.contacts().len(), 15);
        let loaded = emails(h.controller.contacts());
        for contact in &early {
            assert!(loaded.contains(&contact.email), "missing {}", contact.email);
        }

        // The rest of the cache is already on screen.
        h.drain();
        h.controller.load_more_if_needed(14);
        assert_eq!(h.controller.contacts().len(), 15);
        assert!(h.drain().is_empty());
        assert_eq!(h.fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_on_load_more_leaves_contacts_unchanged() {
        let mut h = harness(true, 5);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.fetcher.push(Err(SyncError::EmptyResponseBody));
        h.controller.load_initial();
        h.controller.settle().await;
        let before = h.controller.contacts().to_vec();
        h.drain();

        h.controller.load_more_if_needed(4);
        h.controller.settle().await;

        assert!(!h.controller.is_loading());
        assert_eq!(h.controller.contacts(), before.as_slice());
        assert_eq!(
            h.drain(),
            vec![
                SyncEvent::LoadingChanged(true),
                SyncEvent::LoadingChanged(false),
                SyncEvent::Error(SyncError::EmptyResponseBody),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_body_with_empty_list_falls_back_to_cache() {
        let mut h = harness(true, 5);
        h.fetcher.push(Err(SyncError::EmptyResponseBody));
        h.controller.load_initial();
        h.drain();

        let mut db = Database::open_in_memory().unwrap();
        db.import(&page("C", 3, 0).results).unwrap();
        h.controller.store = Box::new(db);

        h.controller.settle().await;
        assert_eq!(h.controller.contacts().len(), 3);
        assert_eq!(
            h.drain(),
            vec![
                SyncEvent::LoadingChanged(false),
                SyncEvent::DataChanged,
                SyncEvent::Error(SyncError::EmptyResponseBody),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_published_without_fallback() {
        let mut h = harness(true, 5);
        let err = SyncError::InvalidEndpoint("relative URL without a base".into());
        h.fetcher.push(Err(err.clone()));
        h.controller.load_initial();
        h.drain();

        let mut db = Database::open_in_memory().unwrap();
        db.import(&page("C", 3, 0).results).unwrap();
        h.controller.store = Box::new(db);

        h.controller.settle().await;
        assert!(!h.controller.is_loading());
        assert!(h.controller.contacts().is_empty());
        assert_eq!(
            h.drain(),
            vec![SyncEvent::LoadingChanged(false), SyncEvent::Error(err)]
        );
    }

    #[tokio::test]
    async fn test_connectivity_restored_reloads_empty_list() {
        let mut h = harness(false, 5);
        h.controller.load_initial();
        assert!(h.controller.contacts().is_empty());

        h.signal.set_online(true);
        h.fetcher.push(Ok(page("A", 5, 0)));
        h.controller.on_connectivity_restored();
        h.controller.settle().await;
        assert_eq!(h.controller.contacts().len(), 5);

        // With data on screen a restore does nothing.
        h.controller.on_connectivity_restored();
        assert!(!h.controller.is_loading());
        assert_eq!(h.fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let mut h = harness(false, 5);
        let extra = h.controller.subscribe();
        drop(extra);
        h.controller.filter("x");
        assert_eq!(h.controller.listeners.len(), 1);
        assert_eq!(h.drain(), vec![SyncEvent::DataChanged]);
    }
}
