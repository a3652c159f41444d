//! Partial-update diffing and a paginated collection cache for REST-backed
//! admin clients.
//!
//! # Examples
//!
//! Computing the minimal PATCH body:
//! ```
//! use pagesync::diff::engine::{compute_changes, is_empty_patch};
//! use serde_json::json;
//!
//! let original = json!({"name": "Intro to Rust", "price": 10});
//! let edited = json!({"name": "Intro to Rust", "price": "10.00"});
//! assert!(is_empty_patch(&compute_changes(&original, &edited).expect("objects")));
//!
//! let edited = json!({"name": "Advanced Rust", "price": 10});
//! let patch = compute_changes(&original, &edited).expect("objects");
//! assert_eq!(patch.keys().collect::<Vec<_>>(), vec!["name"]);
//! ```
//!
//! Subscribing to a paginated list:
//! ```no_run
//! use std::sync::Arc;
//!
//! use pagesync::{
//!     api::{ApiClient, StaticToken, Transport, rest::RestPageFetcher},
//!     query::QueryKey,
//!     runtime::handle::{spawn_cache, CacheConfig},
//! };
//!
//! # async fn run(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(transport, Arc::new(StaticToken("token".to_string())));
//! let cache = spawn_cache(CacheConfig::default());
//! let fetcher = Arc::new(RestPageFetcher::new(client));
//!
//! let key = QueryKey::new("courses", 10).filter("active", true);
//! let mut courses = cache.use_collection(key.clone(), fetcher).await?;
//! let state = courses.wait_for(|s| !s.loading).await?;
//! println!("{} courses on page 1", state.items.len());
//!
//! courses.set_page(2).await?;
//! cache.invalidate_resource("courses").await?;
//! cache.shutdown().await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

/// Network collaborator boundary and REST fetchers.
pub mod api;
/// Collection store, state, and dependency index.
pub mod cache;
/// Field diffing for partial updates.
pub mod diff;
/// Mutation helpers wiring diffs, requests, and invalidation together.
pub mod mutation;
/// Query keys and page metadata.
pub mod query;
/// Records and sparse patches.
pub mod record;
/// Single-writer cache runtime and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
