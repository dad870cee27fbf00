//! Identity resolution for scoping remote persistence.

use std::sync::{PoisonError, RwLock};

use crate::core::ids::UserId;

/// Source of the current authenticated identity.
pub trait IdentityProvider: Send + Sync {
    /// The signed-in identity, or `None` when signed out.
    fn current(&self) -> Option<UserId>;
}

/// Identity held in memory and swapped on sign-in / sign-out.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: RwLock<Option<UserId>>,
}

impl StaticIdentity {
    /// Start with `user` signed in (or signed out when `None`).
    #[must_use]
    pub const fn new(user: Option<UserId>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    /// Start signed out.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self::new(None)
    }

    /// Sign `user` in, replacing any previous identity.
    pub fn sign_in(&self, user: UserId) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    /// Sign out.
    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<UserId> {
        *self.user.read().unwrap_or_else(PoisonError::into_inner)
    }
}
