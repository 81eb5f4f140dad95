//! Principal resolution and room authorization.
//!
//! Authentication happens upstream; the gateway trusts the principal the
//! [`PrincipalResolver`] extracts from the upgrade request. Every join is then
//! checked against the [`AccessDirectory`], the CRUD layer's view of which
//! tenant owns a room and who belongs to which chat.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::http::HeaderMap;
use parking_lot::RwLock;
use roomcast_core::{ChatTarget, RealtimeError, RoomKey, RoomType, TenantId, UserId};
use serde::{Deserialize, Serialize};

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the user's tenant id.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the user's role.
pub const ROLE_HEADER: &str = "x-user-role";

/// Tenant role of a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Tenant owner.
    Owner,
    /// Administrator.
    Admin,
    /// Regular member.
    #[default]
    Member,
    /// External guest (client portal).
    Guest,
}

impl Role {
    /// Parse a header value; unknown roles fall back to `Member`.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            "guest" => Self::Guest,
            _ => Self::Member,
        }
    }
}

/// Authenticated identity of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// User id.
    pub user_id: UserId,
    /// Tenant id.
    pub tenant_id: TenantId,
    /// Role within the tenant.
    pub role: Role,
}

impl Principal {
    /// Build a principal.
    pub fn new(user_id: impl Into<UserId>, tenant_id: impl Into<TenantId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            role,
        }
    }
}

/// Extracts the principal from an upgrade request.
pub trait PrincipalResolver: Send + Sync {
    /// `None` for an unauthenticated request.
    fn resolve(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Trusts identity headers set by the authenticating reverse proxy.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderPrincipalResolver;

impl PrincipalResolver for HeaderPrincipalResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<Principal> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let user_id = header(USER_HEADER)?;
        let tenant_id = header(TENANT_HEADER)?;
        let role = header(ROLE_HEADER).map(Role::parse).unwrap_or_default();
        Some(Principal::new(user_id, tenant_id, role))
    }
}

/// The CRUD layer's ownership and chat-membership data.
#[async_trait]
pub trait AccessDirectory: Send + Sync {
    /// Tenant owning the entity behind `room`; `None` if the entity is unknown.
    async fn room_tenant(&self, room: &RoomKey) -> Option<TenantId>;

    /// Whether `user` belongs to the chat target.
    async fn is_chat_member(&self, user: &UserId, target: ChatTarget, target_id: &str) -> bool;
}

/// Check whether `principal` may join `room`.
///
/// Notification rooms only require that the room is the principal's own.
/// Every other room requires a tenant match; chat rooms additionally require
/// explicit membership in the chat entity.
pub async fn authorize(
    principal: Option<&Principal>,
    room: &RoomKey,
    directory: &dyn AccessDirectory,
) -> Result<(), RealtimeError> {
    let Some(principal) = principal else {
        return Err(RealtimeError::denied(room, "connection is not authenticated"));
    };

    if room.room_type == RoomType::UserNotification {
        return if room.id == principal.user_id.as_str() {
            Ok(())
        } else {
            Err(RealtimeError::denied(room, "not your notification stream"))
        };
    }

    match directory.room_tenant(room).await {
        Some(tenant) if tenant == principal.tenant_id => {}
        Some(_) => return Err(RealtimeError::denied(room, "room belongs to another tenant")),
        None => return Err(RealtimeError::denied(room, "unknown room")),
    }

    if let Some(target) = room.room_type.chat_target() {
        if !directory
            .is_chat_member(&principal.user_id, target, &room.id)
            .await
        {
            return Err(RealtimeError::denied(room, "not a member of this chat"));
        }
    }
    Ok(())
}

/// In-process directory, for development servers and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    owners: RwLock<HashMap<RoomKey, TenantId>>,
    chat_members: RwLock<HashMap<RoomKey, HashSet<UserId>>>,
}

impl InMemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `tenant` owns the entity behind `room`.
    pub fn register_room(&self, room: RoomKey, tenant: impl Into<TenantId>) {
        let _ = self.owners.write().insert(room, tenant.into());
    }

    /// Add a user to a chat room.
    pub fn add_chat_member(&self, room: &RoomKey, user: impl Into<UserId>) {
        let _ = self
            .chat_members
            .write()
            .entry(room.clone())
            .or_default()
            .insert(user.into());
    }

    /// Remove a user from a chat room.
    pub fn remove_chat_member(&self, room: &RoomKey, user: &UserId) {
        if let Some(members) = self.chat_members.write().get_mut(room) {
            let _ = members.remove(user);
        }
    }
}

#[async_trait]
impl AccessDirectory for InMemoryDirectory {
    async fn room_tenant(&self, room: &RoomKey) -> Option<TenantId> {
        self.owners.read().get(room).cloned()
    }

    async fn is_chat_member(&self, user: &UserId, target: ChatTarget, target_id: &str) -> bool {
        self.chat_members
            .read()
            .get(&target.room(target_id))
            .is_some_and(|members| members.contains(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    fn directory() -> InMemoryDirectory {
        let dir = InMemoryDirectory::new();
        dir.register_room(RoomKey::project("p1"), "t1");
        dir.register_room(RoomKey::chat_channel("42"), "t1");
        dir.add_chat_member(&RoomKey::chat_channel("42"), "u1");
        dir
    }

    fn alice() -> Principal {
        Principal::new("u1", "t1", Role::Member)
    }

    #[tokio::test]
    async fn same_tenant_project_is_allowed() {
        let dir = directory();
        assert!(authorize(Some(&alice()), &RoomKey::project("p1"), &dir).await.is_ok());
    }

    #[tokio::test]
    async fn other_tenant_is_denied() {
        let dir = directory();
        let mallory = Principal::new("u9", "t2", Role::Admin);
        let err = authorize(Some(&mallory), &RoomKey::project("p1"), &dir)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUTHORIZATION_DENIED");
    }

    #[tokio::test]
    async fn unknown_room_is_denied() {
        let dir = directory();
        assert_matches!(
            authorize(Some(&alice()), &RoomKey::project("nope"), &dir).await,
            Err(RealtimeError::AuthorizationDenied { .. })
        );
    }

    #[tokio::test]
    async fn chat_requires_membership() {
        let dir = directory();
        let room = RoomKey::chat_channel("42");
        assert!(authorize(Some(&alice()), &room, &dir).await.is_ok());
        let bob = Principal::new("u2", "t1", Role::Owner);
        assert_matches!(
            authorize(Some(&bob), &room, &dir).await,
            Err(RealtimeError::AuthorizationDenied { reason, .. }) if reason.contains("member")
        );
        dir.remove_chat_member(&room, &UserId::from("u1"));
        assert!(authorize(Some(&alice()), &room, &dir).await.is_err());
    }

    #[tokio::test]
    async fn own_notification_room_only() {
        let dir = directory();
        let own = RoomKey::user_notification(&UserId::from("u1"));
        let other = RoomKey::user_notification(&UserId::from("u2"));
        assert!(authorize(Some(&alice()), &own, &dir).await.is_ok());
        assert!(authorize(Some(&alice()), &other, &dir).await.is_err());
    }

    #[tokio::test]
    async fn anonymous_is_denied() {
        let dir = directory();
        assert!(authorize(None, &RoomKey::project("p1"), &dir).await.is_err());
    }

    #[test]
    fn header_resolver_reads_identity() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(USER_HEADER, HeaderValue::from_static("u1"));
        let _ = headers.insert(TENANT_HEADER, HeaderValue::from_static("t1"));
        let _ = headers.insert(ROLE_HEADER, HeaderValue::from_static("Admin"));
        let p = HeaderPrincipalResolver.resolve(&headers).unwrap();
        assert_eq!(p, Principal::new("u1", "t1", Role::Admin));
    }

    #[test]
    fn header_resolver_requires_user_and_tenant() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(USER_HEADER, HeaderValue::from_static("u1"));
        assert!(HeaderPrincipalResolver.resolve(&headers).is_none());
        let _ = headers.insert(TENANT_HEADER, HeaderValue::from_static("  "));
        assert!(HeaderPrincipalResolver.resolve(&headers).is_none());
    }

    #[test]
    fn role_parse_defaults_to_member() {
        assert_eq!(Role::parse("GUEST"), Role::Guest);
        assert_eq!(Role::parse("whatever"), Role::Member);
    }
}
