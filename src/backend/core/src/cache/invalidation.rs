//! Cache invalidation events.

use serde::{Deserialize, Serialize};

use crate::rbac::models::{ResourceRef, UserId};

/// What a write invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// Global roles of one user changed.
    User { user_id: UserId },

    /// Membership of one user on one resource changed.
    Membership {
        user_id: UserId,
        resource: ResourceRef,
    },

    /// Every membership of a resource changed (resource deleted).
    Resource { resource: ResourceRef },

    /// Everything, e.g. after a catalog reload.
    All,
}

impl InvalidationEvent {
    pub fn user(user_id: UserId) -> Self {
        Self::User { user_id }
    }

    pub fn membership(user_id: UserId, resource: ResourceRef) -> Self {
        Self::Membership { user_id, resource }
    }

    pub fn resource(resource: ResourceRef) -> Self {
        Self::Resource { resource }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Membership { .. } => "membership",
            Self::Resource { .. } => "resource",
            Self::All => "all",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = InvalidationEvent::membership(
            UserId::from("u1"),
            ResourceRef::project("p-1").unwrap(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "membership");
        assert_eq!(json["resource"]["referenceTable"], "PROJECT");
        assert_eq!(event.kind(), "membership");
    }
}
