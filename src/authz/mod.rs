//! Authorization module
//!
//! The access predicate consulted before an upload target is issued. The
//! pipeline only needs a single boolean answer for (collection, requester);
//! richer policy engines plug in behind the same [`Authorizer`] trait.

use crate::config::AccessConfig;
use crate::registry::CollectionRegistry;
use async_trait::async_trait;
use thiserror::Error;

/// Action name used when requesting an upload target
pub const ACTION_UPLOAD: &str = "upload";

/// Action name used when removing a record
pub const ACTION_DELETE: &str = "delete";

/// Authorization errors
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Access denied")]
    AccessDenied,

    #[error("Policy error: {0}")]
    PolicyError(String),
}

/// Authorization request
#[derive(Debug, Clone)]
pub struct AuthzRequest {
    /// Authenticated requester, if any
    pub subject: Option<String>,
    pub action: String,
    pub collection: String,
}

impl AuthzRequest {
    pub fn new(
        subject: Option<&str>,
        action: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.map(str::to_string),
            action: action.into(),
            collection: collection.into(),
        }
    }
}

/// Authorizer trait
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Check if the request is authorized
    async fn authorize(&self, request: &AuthzRequest) -> Result<bool, AuthzError>;
}

/// No-op authorizer that always allows
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn authorize(&self, _request: &AuthzRequest) -> Result<bool, AuthzError> {
        Ok(true)
    }
}

/// No-op authorizer that always denies
pub struct DenyAllAuthorizer;

#[async_trait]
impl Authorizer for DenyAllAuthorizer {
    async fn authorize(&self, _request: &AuthzRequest) -> Result<bool, AuthzError> {
        Ok(false)
    }
}

/// Authorizer driven by each collection's `access` setting
///
/// - `public`: anyone, including anonymous requesters
/// - `authenticated`: any requester with a subject
/// - `subjects`: only the listed subjects
///
/// Unknown collections are denied.
pub struct CollectionAccessAuthorizer {
    registry: CollectionRegistry,
}

impl CollectionAccessAuthorizer {
    pub fn new(registry: CollectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Authorizer for CollectionAccessAuthorizer {
    async fn authorize(&self, request: &AuthzRequest) -> Result<bool, AuthzError> {
        let Some(settings) = self.registry.get(&request.collection) else {
            return Ok(false);
        };

        let allowed = match &settings.access {
            AccessConfig::Public => true,
            AccessConfig::Authenticated => request.subject.is_some(),
            AccessConfig::Subjects { subjects } => request
                .subject
                .as_ref()
                .is_some_and(|s| subjects.iter().any(|allowed| allowed == s)),
        };

        tracing::debug!(
            collection = %request.collection,
            action = %request.action,
            subject = request.subject.as_deref().unwrap_or("-"),
            allowed,
            "Access predicate evaluated"
        );

        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;

    fn test_request(subject: Option<&str>, collection: &str) -> AuthzRequest {
        AuthzRequest::new(subject, ACTION_UPLOAD, collection)
    }

    fn registry() -> CollectionRegistry {
        let mut public = CollectionConfig::new("public");
        public.access = AccessConfig::Public;
        let members = CollectionConfig::new("members");
        let mut staff = CollectionConfig::new("staff");
        staff.access = AccessConfig::Subjects {
            subjects: vec!["alice".into(), "bob".into()],
        };
        CollectionRegistry::from_collections(&[public, members, staff])
    }

    #[tokio::test]
    async fn test_allow_all() {
        let authz = AllowAllAuthorizer;
        let result = authz.authorize(&test_request(None, "x")).await.unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn test_deny_all() {
        let authz = DenyAllAuthorizer;
        let result = authz
            .authorize(&test_request(Some("alice"), "x"))
            .await
            .unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn test_public_collection_allows_anonymous() {
        let authz = CollectionAccessAuthorizer::new(registry());
        assert!(authz.authorize(&test_request(None, "public")).await.unwrap());
    }

    #[tokio::test]
    async fn test_authenticated_collection_requires_subject() {
        let authz = CollectionAccessAuthorizer::new(registry());
        assert!(!authz.authorize(&test_request(None, "members")).await.unwrap());
        assert!(authz
            .authorize(&test_request(Some("carol"), "members"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_subject_list() {
        let authz = CollectionAccessAuthorizer::new(registry());
        assert!(authz
            .authorize(&test_request(Some("bob"), "staff"))
            .await
            .unwrap());
        assert!(!authz
            .authorize(&test_request(Some("carol"), "staff"))
            .await
            .unwrap());
        assert!(!authz.authorize(&test_request(None, "staff")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_collection_denied() {
        let authz = CollectionAccessAuthorizer::new(registry());
        assert!(!authz
            .authorize(&test_request(Some("alice"), "missing"))
            .await
            .unwrap());
    }
}
