//! # RC Test Utilities
//!
//! Shared test utilities for the Room Coordinator.
//!
//! - `fixtures` - Token minting and seeded stores
//! - `connection` - In-process client that records what the server sends
//! - `harness` - Wires a store, controller and session coordinator together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::new(scenario_store());
//!     let mut host = harness.connect(HOST_ID, HOST_NAME).await;
//!
//!     host.send(join_room(ROOM_ID)).await;
//!     host.expect_event("room-joined").await;
//! }
//! ```

pub mod connection;
pub mod fixtures;
pub mod harness;

pub use connection::*;
pub use fixtures::*;
pub use harness::*;
