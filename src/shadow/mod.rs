//! Device shadow reconciliation
//!
//! Topic layout, document types, the subscription registry, the reported
//! state publisher and the delta handler that ties them together.

pub mod document;
pub mod handler;
pub mod publisher;
pub mod registry;
pub mod topics;

pub use document::{DeltaEvent, RejectedUpdate, ShadowDocument, ShadowUpdate};
pub use handler::{HandleOutcome, ShadowDeltaHandler};
pub use publisher::{PublishResult, StatePublisher};
pub use registry::SubscriptionRegistry;
pub use topics::{ShadowTopics, TopicKind};
