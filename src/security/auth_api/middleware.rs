//! Authorization guard.
//!
//! `AuthenticatedUser` rejects requests without a verifiable session (401).
//! `RequireRole<P>` additionally rejects identities whose role is outside
//! `P::ALLOWED` (403). Handlers declare the one they need as an argument.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

use super::{
    error::AuthError,
    types::{AuthenticatedUser, RolePolicy},
    utils::extract_token,
};
use crate::core::shared::models::Role;
use crate::core::shared::state::AppState;

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }
        let token = extract_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let claims = state.sessions.verify(&token)?;
        let user = AuthenticatedUser::from_claims(claims)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

pub fn require_role(user: &AuthenticatedUser, allowed: &[Role]) -> Result<(), AuthError> {
    if user.has_role(allowed) {
        Ok(())
    } else {
        debug!(
            "Role {} rejected for {} (allowed: {:?})",
            user.role, user.email, allowed
        );
        Err(AuthError::InsufficientPermissions)
    }
}

pub struct RequireRole<P: RolePolicy> {
    pub user: AuthenticatedUser,
    _policy: PhantomData<P>,
}

impl<P: RolePolicy> Deref for RequireRole<P> {
    type Target = AuthenticatedUser;
    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

#[axum::async_trait]
impl<P: RolePolicy> FromRequestParts<Arc<AppState>> for RequireRole<P> {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        require_role(&user, P::ALLOWED)?;
        Ok(Self {
            user,
            _policy: PhantomData,
        })
    }
}
