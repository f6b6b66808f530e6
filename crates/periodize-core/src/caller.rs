//! Identity of whoever is calling a request-layer operation.
//!
//! Authentication happens upstream; operations here only receive the
//! resolved identity and role and apply ownership rules.

use std::fmt;
use std::str::FromStr;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    /// May simulate payment approvals without the gateway.
    PaymentTester,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::PaymentTester => "payment_tester",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" | "user" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "payment_tester" | "payment-tester" => Ok(Self::PaymentTester),
            other => Err(format!("unknown role: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: String,
    pub role: Role,
}

impl Caller {
    pub fn owner(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role: Role::Owner,
        }
    }

    pub fn admin(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own records; admins see everything.
    pub fn can_access(&self, owner: &str) -> bool {
        self.is_admin() || self.identity == owner
    }

    pub fn ensure_access(&self, owner: &str, what: &str) -> Result<(), ServiceError> {
        if self.can_access(owner) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "{what} belongs to another user"
            )))
        }
    }

    pub fn can_simulate_payments(&self) -> bool {
        matches!(self.role, Role::Admin | Role::PaymentTester)
    }
}
