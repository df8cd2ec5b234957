//! Common test infrastructure for end-to-end tests
//!
//! Every test builds its own router around an in-memory case store and
//! scripted collaborators, then drives it with `tower::ServiceExt::oneshot`.
//!
//! # Example
//!
//! ```no_run
//! use common::{TestApp, TENANT};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let app = TestApp::builder().build();
//!     let (status, body) = app.post_json("/v1/search", serde_json::json!({
//!         "query": "refund",
//!         "tenant_id": TENANT,
//!     })).await;
//!     assert_eq!(status, 200);
//! }
//! ```

mod constants;
mod fakes;
mod fixtures;
mod server;

// Re-export commonly used items for convenience
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fakes::{RecordingIndexer, ScriptedLlm, StaticSource};
#[allow(unused_imports)]
pub use server::{TestApp, TestAppBuilder};
