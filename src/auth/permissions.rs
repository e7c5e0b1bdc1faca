//! Request permissions.
//!
//! Two permissions that share a concrete type are interchangeable, so
//! equality is a type-tag comparison; see [`same_permission`].

use std::any::TypeId;

use async_trait::async_trait;
use http::request::Parts;

use super::SchedulerAuthenticator;

#[async_trait]
pub trait Permission: Send + Sync + 'static {
    async fn has_permission(&self, request: &Parts) -> bool;

    fn permission_type(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

/// Whether `a` and `b` are the same kind of permission.
pub fn same_permission(a: &dyn Permission, b: &dyn Permission) -> bool {
    a.permission_type() == b.permission_type()
}

/// Allows every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAny;

#[async_trait]
impl Permission for AllowAny {
    async fn has_permission(&self, _request: &Parts) -> bool {
        true
    }
}

/// Allows only requests authenticated as the cloud scheduler.
#[derive(Clone)]
pub struct IsCloudScheduler {
    authenticator: SchedulerAuthenticator,
}

impl IsCloudScheduler {
    pub fn new(authenticator: SchedulerAuthenticator) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Permission for IsCloudScheduler {
    async fn has_permission(&self, request: &Parts) -> bool {
        self.authenticator.is_cloud_scheduler(request).await
    }
}
