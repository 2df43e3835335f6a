//! Shared test utilities
//!
//! This crate provides reusable test infrastructure:
//! - `FakeBroker`: a scriptable in-memory broker implementing the
//!   `queue_publisher` transport traits, with observable counters and
//!   failure-signal injection
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::FakeBroker;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let broker = FakeBroker::new();
//!     broker.nack_first(2);
//!
//!     let manager = ConnectionManager::new(broker.connector(), 5);
//!     // ...
//!     assert_eq!(broker.messages().len(), 1);
//! }
//! ```

mod broker;

pub use broker::{ConfirmBehavior, FakeBroker, PublishedMessage};
