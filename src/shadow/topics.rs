//! Shadow topic set for a thing
//!
//! Fixed for the lifetime of a session and derived only from the thing name
//! and the optional reserved-topic prefix.

use crate::config::BridgeConfig;

/// Which of the subscribed shadow topics a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Delta,
    Rejected,
    Other,
}

/// `<root>/update`, `<root>/update/delta` and `<root>/update/rejected`
/// where `<root> = {prefix}things/{thing}/shadow`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    root: String,
    update: String,
    delta: String,
    rejected: String,
}

impl ShadowTopics {
    pub fn new(prefix: &str, thing: &str) -> Self {
        let root = format!("{prefix}things/{thing}/shadow");
        Self {
            update: format!("{root}/update"),
            delta: format!("{root}/update/delta"),
            rejected: format!("{root}/update/rejected"),
            root,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.thing.topic_prefix, &config.thing.name)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Topic the reported state is published to
    pub fn update(&self) -> &str {
        &self.update
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }

    pub fn rejected(&self) -> &str {
        &self.rejected
    }

    /// Exactly the topics subscribed on every connection
    pub fn subscriptions(&self) -> [&str; 2] {
        [&self.delta, &self.rejected]
    }

    pub fn classify(&self, topic: &str) -> TopicKind {
        if topic == self.delta {
            TopicKind::Delta
        } else if topic == self.rejected {
            TopicKind::Rejected
        } else {
            TopicKind::Other
        }
    }
}
