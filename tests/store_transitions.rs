use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;

use pagesync::{
    api::{FetchError, rest::PageFetcher},
    cache::{
        state::Status,
        store::{CachePolicy, CollectionStore, PageSwitch, StoreError},
    },
    query::{Page, PageMeta, QueryKey},
    record::Record,
    runtime::events::CacheEvent,
};

/// Fetcher whose network side is never exercised; the store only hands out
/// orders.
struct Offline {
    depends_on: Vec<String>,
}

#[async_trait]
impl PageFetcher for Offline {
    async fn fetch_page(&self, _key: &QueryKey) -> Result<Page, FetchError> {
        Err(FetchError::network("offline"))
    }

    fn dependencies(&self, _key: &QueryKey) -> Vec<String> {
        self.depends_on.clone()
    }
}

fn offline() -> Arc<dyn PageFetcher> {
    Arc::new(Offline { depends_on: vec![] })
}

fn offline_depending_on(resource: &str) -> Arc<dyn PageFetcher> {
    Arc::new(Offline {
        depends_on: vec![resource.to_string()],
    })
}

fn items(page: u32, n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            json!({"id": page * 100 + i as u32, "name": format!("item {i}")})
                .as_object()
                .cloned()
                .expect("object")
        })
        .collect()
}

fn page(current_page: u32, n: usize, total_pages: u32, take: u32, total_items: u64) -> Page {
    Page {
        data: items(current_page, n),
        meta: PageMeta {
            current_page,
            total_pages,
            items_per_page: take,
            total_items,
        },
    }
}


#[test]
fn second_subscriber_reuses_in_flight_fetch() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("courses", 10);

    let (a, rx_a, order) = store.subscribe(key.clone(), offline()).expect("subscribe a");
    let order = order.expect("first subscription fetches");
    assert_eq!(order.key, key);
    assert_eq!(rx_a.borrow().status, Status::Loading);

    let (b, rx_b, again) = store.subscribe(key.clone(), offline()).expect("subscribe b");
    assert!(again.is_none());
    assert_ne!(a, b);
    assert_eq!(store.subscriber_count(&key), 2);

    assert!(store.complete_fetch(order.key, order.seq, Ok(page(1, 10, 3, 10, 25))));
    let seen_by_a = rx_a.borrow().clone();
    let seen_by_b = rx_b.borrow().clone();
    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(seen_by_a.status, Status::Ready);
    assert_eq!(seen_by_a.items.len(), 10);

    let (_, _, fresh) = store.subscribe(key, offline()).expect("subscribe c");
    assert!(fresh.is_none(), "fresh ready entry is not refetched");
}

#[test]
fn subscribers_on_different_pages_keep_independent_data() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let first = QueryKey::new("students", 10);
    let second = first.clone().with_page(2);

    let (a, rx_a, order_a) = store.subscribe(first.clone(), offline()).expect("page 1");
    let (b, rx_b, order_b) = store.subscribe(second.clone(), offline()).expect("page 2");
    let order_a = order_a.expect("page 1 fetch");
    let order_b = order_b.expect("page 2 fetch");
    assert_eq!(store.len(), 2);

    assert!(store.complete_fetch(order_b.key, order_b.seq, Ok(page(2, 10, 3, 10, 25))));
    assert!(store.complete_fetch(order_a.key, order_a.seq, Ok(page(1, 10, 3, 10, 25))));

    {
        let state = rx_a.borrow();
        assert_eq!(state.key, first);
        assert_eq!(state.meta.map(|m| m.current_page), Some(1));
        assert_eq!(state.items[0].get("id"), Some(&json!(100)));
    }
    {
        let state = rx_b.borrow();
        assert_eq!(state.key, second);
        assert_eq!(state.meta.map(|m| m.current_page), Some(2));
        assert_eq!(state.items[0].get("id"), Some(&json!(200)));
    }
    assert_eq!(store.location(a), Some(&first));
    assert_eq!(store.location(b), Some(&second));

    // Joining a fresh page needs no fetch, and page 1 stays cached.
    let order = store
        .set_page(&first, 2, PageSwitch::KeepPrevious)
        .expect("switch");
    assert!(order.is_none());
    assert_eq!(rx_a.borrow().items[0].get("id"), Some(&json!(200)));
    assert_eq!(store.subscriber_count(&second), 2);
    assert_eq!(store.subscriber_count(&first), 0);
    assert_eq!(store.state(&first).expect("cached").items.len(), 10);
}

#[test]
fn newest_page_request_wins() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("students", 10);

    let (_, rx, first) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let first = first.expect("order");
    store.complete_fetch(first.key, first.seq, Ok(page(1, 10, 3, 10, 25)));

    let p2 = store
        .set_page(&key, 2, PageSwitch::KeepPrevious)
        .expect("page 2")
        .expect("order 2");
    let p3 = store
        .set_page(&key.clone().with_page(2), 3, PageSwitch::KeepPrevious)
        .expect("page 3")
        .expect("order 3");
    assert!(p3.seq > p2.seq);

    {
        let state = rx.borrow();
        assert_eq!(state.key.page, 3);
        assert_eq!(state.meta.map(|m| m.current_page), Some(1));
        assert_eq!(state.items.len(), 10, "previous page stays visible");
        assert!(state.loading);
    }

    assert!(store.complete_fetch(p3.key, p3.seq, Ok(page(3, 5, 3, 10, 25))));
    assert!(!store.complete_fetch(p2.key.clone(), p2.seq, Ok(page(2, 10, 3, 10, 25))));

    {
        let state = rx.borrow();
        assert_eq!(state.meta.map(|m| m.current_page), Some(3));
        assert_eq!(state.items.len(), 5);
        assert!(!state.loading);
    }

    let events = store.drain_events();
    assert!(events.contains(&CacheEvent::StaleResponseDiscarded {
        key: p2.key,
        seq: p2.seq,
    }));
}

#[test]
fn clearing_page_switch_empties_items_immediately() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("lessons", 5);
    let (_, rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Ok(page(1, 5, 2, 5, 8)));

    store
        .set_page(&key, 2, PageSwitch::Clear)
        .expect("page 2")
        .expect("order");
    let state = rx.borrow();
    assert!(state.items.is_empty());
    assert!(state.meta.is_none());
    assert_eq!(state.status, Status::Loading);
}

#[test]
fn same_page_while_loading_does_not_refetch() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("areas", 10);
    let (_, _rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    assert!(order.is_some());
    let again = store
        .set_page(&key, 1, PageSwitch::KeepPrevious)
        .expect("set page");
    assert!(again.is_none());
}

#[test]
fn failed_fetch_keeps_last_good_page() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("course-classes", 10);
    let (_, rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Ok(page(1, 4, 1, 10, 4)));

    let retry = store.refetch(&key).expect("refetch");
    store.complete_fetch(retry.key, retry.seq, Err(FetchError::http(503, "unavailable")));

    let state = rx.borrow();
    assert_eq!(state.status, Status::Errored);
    assert_eq!(state.items.len(), 4);
    assert_eq!(state.error.as_ref().and_then(|e| e.status), Some(503));
}

#[test]
fn failed_fetch_clears_data_when_policy_says_so() {
    let mut store = CollectionStore::new(CachePolicy {
        keep_data_on_error: false,
        ..CachePolicy::default()
    });
    let key = QueryKey::new("course-classes", 10);
    let (_, rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Ok(page(1, 4, 1, 10, 4)));

    let retry = store.refetch(&key).expect("refetch");
    store.complete_fetch(retry.key, retry.seq, Err(FetchError::http(404, "gone")));

    let state = rx.borrow();
    assert!(state.items.is_empty());
    assert!(state.meta.is_none());
}

#[test]
fn errored_entry_refetches_on_next_subscription() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("courses", 10);
    let (_, _rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Err(FetchError::network("offline")));

    let (_, _, again) = store.subscribe(key, offline()).expect("subscribe again");
    assert!(again.is_some());
}

#[test]
fn releasing_last_subscriber_abandons_pending_fetch() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("courses", 10);

    let (id, _rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.release(id);
    assert_eq!(store.location(id), None);

    assert!(!store.complete_fetch(order.key, order.seq, Ok(page(1, 3, 1, 10, 3))));
    let state = store.state(&key).expect("entry retained");
    assert_eq!(state.status, Status::Idle);
    assert!(state.stale);
    assert!(!state.loading);
    assert!(state.items.is_empty());

    let (_, _, again) = store.subscribe(key, offline()).expect("resubscribe");
    assert!(again.is_some());
}

#[test]
fn idle_entries_are_evicted_when_not_retained() {
    let mut store = CollectionStore::new(CachePolicy {
        retain_idle_entries: false,
        ..CachePolicy::default()
    });
    let key = QueryKey::new("course-classes/3/lessons", 10);

    let (a, _rx_a, _) = store
        .subscribe(key.clone(), offline_depending_on("lessons"))
        .expect("a");
    let (b, _rx_b, _) = store.subscribe(key.clone(), offline()).expect("b");
    assert_eq!(store.dependencies().len(), 1);
    store.release(a);
    assert!(store.contains(&key));
    store.release(b);
    assert!(!store.contains(&key));
    assert!(store.dependencies().is_empty());
    assert!(store.drain_events().contains(&CacheEvent::Evicted { key }));
}

#[test]
fn ttl_expiry_triggers_refetch_on_reactivation() {
    let mut store = CollectionStore::new(CachePolicy {
        stale_after: Duration::ZERO,
        ..CachePolicy::default()
    });
    let key = QueryKey::new("courses", 10);
    let (id, _rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Ok(page(1, 2, 1, 10, 2)));
    store.release(id);

    let (_, _, again) = store.subscribe(key, offline()).expect("resubscribe");
    assert!(again.is_some());
}

#[test]
fn invalidating_idle_entry_defers_fetch_to_next_subscription() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("courses", 10);
    let (id, _rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Ok(page(1, 2, 1, 10, 2)));
    store.release(id);

    let outcome = store.invalidate(&|k: &QueryKey| k.resource == "courses");
    assert_eq!(outcome.invalidated, vec![key.clone()]);
    assert!(outcome.orders.is_empty());

    let (_, _, again) = store.subscribe(key, offline()).expect("resubscribe");
    assert!(again.is_some());
}

#[test]
fn predicate_invalidation_spares_unmatched_siblings() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let plain = QueryKey::new("course-classes/1/students", 10);
    let ana = plain.clone().filter("name", "ana");
    let summary = QueryKey::new("course-classes/1/summary", 1);

    let mut receivers = Vec::new();
    for (key, fetcher) in [
        (plain.clone(), offline()),
        (ana.clone(), offline()),
        (summary.clone(), offline_depending_on("course-classes/1/students")),
    ] {
        let (_, rx, order) = store.subscribe(key, fetcher).expect("subscribe");
        let order = order.expect("order");
        store.complete_fetch(order.key, order.seq, Ok(page(1, 2, 1, 10, 2)));
        receivers.push(rx);
    }

    let outcome = store.invalidate(&|k: &QueryKey| k.filters.is_empty() && k.resource.ends_with("students"));
    let mut hit = outcome.invalidated.clone();
    hit.sort_by(|a, b| a.resource.cmp(&b.resource));
    assert_eq!(hit, vec![plain.clone(), summary.clone()]);
    assert_eq!(outcome.orders.len(), 2);
    assert!(outcome.orders.iter().all(|o| o.key != ana));

    let untouched = store.state(&ana).expect("entry");
    assert!(!untouched.stale);
    assert_eq!(untouched.status, Status::Ready);
    assert!(!receivers[1].borrow().loading);
    assert!(receivers[0].borrow().loading);
}

#[test]
fn invalidation_cascades_through_declared_dependencies() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let students = QueryKey::new("students", 10);
    let class_students = QueryKey::new("course-classes/7/students", 10);
    let class_lessons = QueryKey::new("course-classes/7/lessons", 10);
    let areas = QueryKey::new("areas", 10);

    let (_, _s1, _) = store.subscribe(students.clone(), offline()).expect("students");
    let (_, _s2, _) = store
        .subscribe(class_students.clone(), offline_depending_on("students"))
        .expect("class students");
    let (_, _s3, _) = store
        .subscribe(class_lessons.clone(), offline_depending_on("lessons"))
        .expect("class lessons");
    let (_, _s4, _) = store.subscribe(areas.clone(), offline()).expect("areas");

    let outcome = store.invalidate_resource("students");
    let mut hit: Vec<_> = outcome.invalidated.iter().map(|k| k.resource.clone()).collect();
    hit.sort();
    assert_eq!(hit, vec!["course-classes/7/students", "students"]);
    assert_eq!(outcome.orders.len(), 2);

    let outcome = store.invalidate(&|k: &QueryKey| k.resource == "students");
    assert_eq!(outcome.invalidated.len(), 2, "predicate match expands to dependents");

    // No cached `lessons` list, but its dependents still go stale.
    let outcome = store.invalidate_resource("lessons");
    assert_eq!(outcome.invalidated, vec![class_lessons]);

    let outcome = store.invalidate_resource("teachers");
    assert!(outcome.invalidated.is_empty());
}

#[test]
fn filters_and_page_size_separate_entries() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let active = QueryKey::new("courses", 10).filter("active", true);
    let inactive = QueryKey::new("courses", 10).filter("active", false);
    let wide = QueryKey::new("courses", 50).filter("active", true);

    for key in [&active, &inactive, &wide] {
        let (_, _, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
        assert!(order.is_some());
    }
    assert_eq!(store.len(), 3);
    assert_eq!(store.invalidate_resource("courses").invalidated.len(), 3);
}

#[test]
fn out_of_range_meta_is_clamped() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let key = QueryKey::new("courses", 10).with_page(9);
    let (_, rx, order) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let order = order.expect("order");
    store.complete_fetch(order.key, order.seq, Ok(page(9, 0, 3, 10, 25)));
    assert_eq!(rx.borrow().meta.map(|m| m.current_page), Some(3));

    let refetch = store.refetch(&key).expect("refetch");
    store.complete_fetch(refetch.key, refetch.seq, Ok(page(0, 0, 0, 10, 0)));
    assert_eq!(rx.borrow().meta.map(|m| m.current_page), Some(1));
}

#[test]
fn invalid_keys_are_rejected() {
    let mut store = CollectionStore::new(CachePolicy::default());
    let err = store
        .subscribe(QueryKey::new("courses", 10).with_page(0), offline())
        .expect_err("page 0");
    assert!(matches!(err, StoreError::InvalidKey { .. }));

    let err = store
        .subscribe(QueryKey::new("courses", 0), offline())
        .expect_err("take 0");
    assert!(matches!(err, StoreError::InvalidKey { .. }));

    let err = store
        .set_page(&QueryKey::new("nowhere", 10), 2, PageSwitch::KeepPrevious)
        .expect_err("unknown");
    assert!(matches!(err, StoreError::UnknownKey(_)));

    let key = QueryKey::new("courses", 10);
    let (_, _rx, _) = store.subscribe(key.clone(), offline()).expect("subscribe");
    let err = store
        .set_page(&key, 0, PageSwitch::KeepPrevious)
        .expect_err("page 0");
    assert!(matches!(err, StoreError::InvalidKey { .. }));
}
