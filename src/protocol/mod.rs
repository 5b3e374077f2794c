//! # Protocol Layer
//!
//! Turns decoded frames into named events and routes them.
//!
//! ## Components
//! - **Commands**: the command catalogue and typed outbound operations
//! - **Correlation**: maps command codes and payload predicates to operation names
//! - **Topic**: hierarchical `address.group.name.kind` topics and wildcard patterns
//! - **Bus**: topic-filtered publish/subscribe
//! - **Dispatcher**: broadcast dedup, modem NAK retransmit, publication

pub mod bus;
pub mod commands;
pub mod correlation;
pub mod dispatcher;
pub mod topic;

pub use bus::{Event, EventBus, Subscription};
pub use commands::{Command, LinkMode};
pub use topic::{EventKind, Topic, TopicPattern};
