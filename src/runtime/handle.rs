use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::{
    api::{FetchError, rest::PageFetcher},
    cache::{
        state::CollectionState,
        store::{CachePolicy, CollectionStore, FetchOrder, PageSwitch, StoreError},
    },
    query::{Page, QueryKey},
    types::{PageNumber, RequestSeq, SubscriberId},
};

use super::events::CacheEvent;

/// Failure talking to the cache runtime.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The runtime loop has stopped.
    #[error("cache runtime is not running")]
    ChannelClosed,
}

/// Runtime tunables. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age in milliseconds after which a cached page is refetched on reactivation.
    pub stale_after_ms: u64,
    /// Keep the last good page when a fetch fails.
    pub keep_data_on_error: bool,
    /// Keep entries without subscribers cached.
    pub retain_idle_entries: bool,
    /// Capacity of the command queue.
    pub command_queue_bound: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 300_000,
            keep_data_on_error: true,
            retain_idle_entries: true,
            command_queue_bound: 256,
            event_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Store policy derived from this config.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            stale_after: Duration::from_millis(self.stale_after_ms),
            keep_data_on_error: self.keep_data_on_error,
            retain_idle_entries: self.retain_idle_entries,
        }
    }
}

/// Cloneable handle to the cache loop started by [`spawn_cache`].
#[derive(Clone)]
pub struct CacheHandle {
    cmd_tx: mpsc::Sender<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events_tx: broadcast::Sender<CacheEvent>,
}

type Subscribed = (SubscriberId, watch::Receiver<CollectionState>);

enum Command {
    Subscribe {
        key: QueryKey,
        fetcher: Arc<dyn PageFetcher>,
        resp: oneshot::Sender<Result<Subscribed, StoreError>>,
    },
    SetPage {
        key: QueryKey,
        page: PageNumber,
        switch: PageSwitch,
        resp: oneshot::Sender<Result<(), StoreError>>,
    },
    Refetch {
        key: QueryKey,
        resp: oneshot::Sender<Result<(), StoreError>>,
    },
    Invalidate {
        predicate: Box<dyn Fn(&QueryKey) -> bool + Send>,
        resp: oneshot::Sender<usize>,
    },
    InvalidateResource {
        resource: String,
        resp: oneshot::Sender<usize>,
    },
    Snapshot {
        key: QueryKey,
        resp: oneshot::Sender<Option<CollectionState>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

// Messages that must never block or be dropped for lack of queue space.
enum Internal {
    Release {
        id: SubscriberId,
    },
    Completed {
        key: QueryKey,
        seq: RequestSeq,
        result: Result<Page, FetchError>,
    },
}

/// Starts the cache loop on the current tokio runtime.
pub fn spawn_cache(config: CacheConfig) -> CacheHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<Internal>();
    let (events_tx, _) = broadcast::channel::<CacheEvent>(config.event_capacity.max(1));

    let events_tx_loop = events_tx.clone();
    let internal_tx_loop = internal_tx.clone();

    tokio::spawn(async move {
        let mut store = CollectionStore::new(config.policy());
        info!(?config, "cache runtime started");

        loop {
            // Releases and completions queued before a command apply first.
            tokio::select! {
                biased;
                msg = internal_rx.recv() => {
                    let Some(msg) = msg else { break; };
                    handle_internal(msg, &mut store);
                    publish_events(&mut store, &events_tx_loop);
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    let done = handle_command(cmd, &mut store, &internal_tx_loop);
                    publish_events(&mut store, &events_tx_loop);
                    if done {
                        break;
                    }
                }
            }
        }

        info!(entries = store.len(), "cache runtime stopped");
    });

    CacheHandle {
        cmd_tx,
        internal_tx,
        events_tx,
    }
}

impl CacheHandle {
    /// Receiver for every [`CacheEvent`] emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    /// Subscribes to `key`, fetching it unless a fetch is already in flight
    /// or the cached page is still fresh.
    ///
    /// When the entry already exists, its original fetcher is kept and
    /// `fetcher` is ignored.
    pub async fn use_collection(
        &self,
        key: QueryKey,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<Subscription, CacheError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe { key, fetcher, resp: tx })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        let (id, state_rx) = rx.await.map_err(|_| CacheError::ChannelClosed)??;
        Ok(Subscription {
            id,
            rx: state_rx,
            handle: self.clone(),
        })
    }

    /// Moves the subscribers of `key` to `page`, keeping the previous page
    /// visible until the new one resolves.
    pub async fn set_page(&self, key: &QueryKey, page: PageNumber) -> Result<(), CacheError> {
        self.set_page_with(key, page, PageSwitch::KeepPrevious).await
    }

    /// [`CacheHandle::set_page`] with an explicit [`PageSwitch`].
    pub async fn set_page_with(
        &self,
        key: &QueryKey,
        page: PageNumber,
        switch: PageSwitch,
    ) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetPage {
                key: key.clone(),
                page,
                switch,
                resp: tx,
            })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| CacheError::ChannelClosed)??)
    }

    /// Refetches `key` regardless of freshness.
    pub async fn refetch(&self, key: &QueryKey) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Refetch {
                key: key.clone(),
                resp: tx,
            })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| CacheError::ChannelClosed)??)
    }

    /// Marks every entry whose key matches `predicate` stale, plus entries
    /// that declared a dependency on a matched resource. Entries with
    /// subscribers are refetched now, the rest on their next subscription.
    /// Returns the number of entries invalidated.
    pub async fn invalidate<F>(&self, predicate: F) -> Result<usize, CacheError>
    where
        F: Fn(&QueryKey) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Invalidate {
                predicate: Box::new(predicate),
                resp: tx,
            })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        rx.await.map_err(|_| CacheError::ChannelClosed)
    }

    /// Invalidates every entry of `resource` and its declared dependents.
    pub async fn invalidate_resource(&self, resource: impl Into<String>) -> Result<usize, CacheError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::InvalidateResource {
                resource: resource.into(),
                resp: tx,
            })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        rx.await.map_err(|_| CacheError::ChannelClosed)
    }

    /// Current state of `key`'s entry without subscribing.
    pub async fn snapshot(&self, key: &QueryKey) -> Result<Option<CollectionState>, CacheError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot {
                key: key.clone(),
                resp: tx,
            })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        rx.await.map_err(|_| CacheError::ChannelClosed)
    }

    /// Stops the runtime loop.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        rx.await.map_err(|_| CacheError::ChannelClosed)
    }
}

/// A live subscription to one query key. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: watch::Receiver<CollectionState>,
    handle: CacheHandle,
}

impl Subscription {
    /// Identifier of this subscriber.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Key this subscription currently follows.
    pub fn key(&self) -> QueryKey {
        self.rx.borrow().key.clone()
    }

    /// Latest published state.
    pub fn state(&self) -> CollectionState {
        self.rx.borrow().clone()
    }

    /// Waits for the next state transition.
    pub async fn changed(&mut self) -> Result<CollectionState, CacheError> {
        self.rx
            .changed()
            .await
            .map_err(|_| CacheError::ChannelClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Waits until the state satisfies `f`, checking the current state first.
    pub async fn wait_for(
        &mut self,
        f: impl FnMut(&CollectionState) -> bool,
    ) -> Result<CollectionState, CacheError> {
        self.rx
            .wait_for(f)
            .await
            .map(|state| (*state).clone())
            .map_err(|_| CacheError::ChannelClosed)
    }

    /// Refetches the current key.
    pub async fn refetch(&self) -> Result<(), CacheError> {
        let key = self.key();
        self.handle.refetch(&key).await
    }

    /// Moves this subscription, and every other subscriber of its current
    /// key, to `page`.
    pub async fn set_page(&self, page: PageNumber) -> Result<(), CacheError> {
        let key = self.key();
        self.handle.set_page(&key, page).await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.handle.internal_tx.send(Internal::Release { id: self.id });
    }
}

fn handle_command(
    cmd: Command,
    store: &mut CollectionStore,
    internal_tx: &mpsc::UnboundedSender<Internal>,
) -> bool {
    match cmd {
        Command::Subscribe { key, fetcher, resp } => {
            let res = store.subscribe(key, fetcher).map(|(id, rx, order)| {
                dispatch(order, internal_tx);
                (id, rx)
            });
            let _ = resp.send(res);
        }
        Command::SetPage {
            key,
            page,
            switch,
            resp,
        } => {
            let res = store
                .set_page(&key, page, switch)
                .map(|order| dispatch(order, internal_tx));
            let _ = resp.send(res);
        }
        Command::Refetch { key, resp } => {
            let res = store
                .refetch(&key)
                .map(|order| dispatch(Some(order), internal_tx));
            let _ = resp.send(res);
        }
        Command::Invalidate { predicate, resp } => {
            let outcome = store.invalidate(predicate.as_ref());
            let count = outcome.invalidated.len();
            dispatch(outcome.orders, internal_tx);
            let _ = resp.send(count);
        }
        Command::InvalidateResource { resource, resp } => {
            let outcome = store.invalidate_resource(&resource);
            let count = outcome.invalidated.len();
            dispatch(outcome.orders, internal_tx);
            let _ = resp.send(count);
        }
        Command::Snapshot { key, resp } => {
            let _ = resp.send(store.state(&key));
        }
        Command::Shutdown { resp } => {
            let _ = resp.send(());
            return true;
        }
    }

    false
}

fn handle_internal(msg: Internal, store: &mut CollectionStore) {
    match msg {
        Internal::Release { id } => {
            store.release(id);
        }
        Internal::Completed { key, seq, result } => {
            store.complete_fetch(key, seq, result);
        }
    }
}

fn dispatch(orders: impl IntoIterator<Item = FetchOrder>, internal_tx: &mpsc::UnboundedSender<Internal>) {
    for order in orders {
        debug!(key = %order.key, seq = order.seq, "dispatching fetch");
        let tx = internal_tx.clone();
        tokio::spawn(async move {
            let result = order.fetcher.fetch_page(&order.key).await;
            let _ = tx.send(Internal::Completed {
                key: order.key,
                seq: order.seq,
                result,
            });
        });
    }
}

fn publish_events(store: &mut CollectionStore, events_tx: &broadcast::Sender<CacheEvent>) {
    for event in store.drain_events() {
        let _ = events_tx.send(event);
    }
}
