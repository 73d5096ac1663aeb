//! Scope and permission authorization over decoded claims
//!
//! Auth0 grants two flavors of fine-grained access: the OAuth2
//! `scope` claim, a single space-delimited string, and the RBAC
//! `permissions` claim, a list of strings. An endpoint states what it
//! demands through [`Requirements`]; [`check`] enforces them in
//! order, scope first, stopping at the first deficiency.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::VerifyError;
use crate::jwt::ClaimSet;

/// The claim carrying space-delimited OAuth2 scopes
pub const SCOPE_CLAIM: &str = "scope";

/// The claim carrying the permission list
pub const PERMISSIONS_CLAIM: &str = "permissions";

/// The scopes and permissions an endpoint demands of a token
///
/// Order is preserved: when a token is deficient, the first missing
/// value in the order given here is the one reported.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct Requirements {
    scopes: Vec<String>,
    permissions: Vec<String>,
}

impl Requirements {
    /// No scopes or permissions required
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    /// Requires every listed scope
    pub fn scopes<I>(scopes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            permissions: Vec::new(),
        }
    }

    /// Requires every listed permission
    pub fn permissions<I>(permissions: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            scopes: Vec::new(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds a required scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Adds a required permission
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    /// Whether nothing is required
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.permissions.is_empty()
    }

    /// The required scopes, in the order given
    #[must_use]
    pub fn required_scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The required permissions, in the order given
    #[must_use]
    pub fn required_permissions(&self) -> &[String] {
        &self.permissions
    }
}

/// Checks the claims against the requirements
///
/// The scope check runs before the permission check, and the first
/// failure is returned without evaluating the rest.
///
/// # Errors
///
/// A required claim that is absent or has the wrong shape fails with
/// a missing-claim error; a claim lacking a required value fails with
/// an insufficient-claim error naming that value.
pub fn check(claims: &ClaimSet, requirements: &Requirements) -> Result<(), VerifyError> {
    if !requirements.scopes.is_empty() {
        check_scope(claims, &requirements.scopes)?;
    }

    if !requirements.permissions.is_empty() {
        check_permissions(claims, &requirements.permissions)?;
    }

    Ok(())
}

/// Checks the space-delimited `scope` claim for every required scope
///
/// # Errors
///
/// See [`check`].
pub fn check_scope(claims: &ClaimSet, required: &[String]) -> Result<(), VerifyError> {
    // A non-string claim is indistinguishable from an absent one.
    let granted = match claims.get(SCOPE_CLAIM) {
        Some(Value::String(scope)) => scope.split(' ').collect::<HashSet<_>>(),
        _ => return Err(VerifyError::MissingClaim { claim: SCOPE_CLAIM }),
    };

    for want in required {
        if !granted.contains(want.as_str()) {
            return Err(VerifyError::InsufficientClaim {
                claim: SCOPE_CLAIM,
                value: want.clone(),
            });
        }
    }

    Ok(())
}

/// Checks the `permissions` list claim for every required permission
///
/// # Errors
///
/// See [`check`].
pub fn check_permissions(claims: &ClaimSet, required: &[String]) -> Result<(), VerifyError> {
    let granted = match claims.get(PERMISSIONS_CLAIM) {
        Some(Value::Array(permissions)) => permissions
            .iter()
            .filter_map(Value::as_str)
            .collect::<HashSet<_>>(),
        _ => {
            return Err(VerifyError::MissingClaim {
                claim: PERMISSIONS_CLAIM,
            })
        }
    };

    for want in required {
        if !granted.contains(want.as_str()) {
            return Err(VerifyError::InsufficientClaim {
                claim: PERMISSIONS_CLAIM,
                value: want.clone(),
            });
        }
    }

    Ok(())
}
