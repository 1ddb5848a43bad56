//! # Capability Policy
//!
//! One gate for every role check. Services ask `authorize(role, capability)`
//! once per operation, before any other work.
//!
//! ## Matrix
//! ```text
//! ┌──────────────────────┬─────────┬─────────┬─────────┐
//! │ Capability           │ CASHIER │ MANAGER │  OWNER  │
//! ├──────────────────────┼─────────┼─────────┼─────────┤
//! │ CreateSale           │    ✓    │    ✓    │    ✓    │
//! │ SyncOffline          │    ✓    │    ✓    │    ✓    │
//! │ OpenShift            │    ✓    │    ✓    │    ✓    │
//! │ CloseShift           │    ✓    │    ✓    │    ✓    │
//! │ RecordPayment        │    ✓    │    ✓    │    ✓    │
//! │ RequestTransfer      │    ✓    │    ✓    │    ✓    │
//! │ ApproveTransfer      │         │    ✓    │    ✓    │
//! │ CancelTransfer       │         │    ✓    │    ✓    │
//! │ VoidSale             │         │    ✓    │    ✓    │
//! │ AdjustStock          │         │    ✓    │    ✓    │
//! │ ReceiveStock         │         │    ✓    │    ✓    │
//! │ RecordExpense        │         │    ✓    │    ✓    │
//! │ PostJournal          │         │         │    ✓    │
//! └──────────────────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! Closing a shift is a cashier capability; the closure itself still needs a
//! manager PIN or an owner override, checked by the shift service.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Manager,
    Cashier,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER",
            Role::Manager => "MANAGER",
            Role::Cashier => "CASHIER",
        }
    }

    /// True for roles whose PIN approves closures and transfers.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, Role::Owner | Role::Manager)
    }

    pub fn allows(&self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Owner => true,
            Role::Manager => !matches!(capability, PostJournal),
            Role::Cashier => matches!(
                capability,
                CreateSale | SyncOffline | OpenShift | CloseShift | RecordPayment | RequestTransfer
            ),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    CreateSale,
    SyncOffline,
    OpenShift,
    CloseShift,
    RecordPayment,
    RequestTransfer,
    ApproveTransfer,
    CancelTransfer,
    VoidSale,
    AdjustStock,
    ReceiveStock,
    RecordExpense,
    PostJournal,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CreateSale => "create sales",
            Capability::SyncOffline => "sync offline sales",
            Capability::OpenShift => "open shifts",
            Capability::CloseShift => "close shifts",
            Capability::RecordPayment => "record payments",
            Capability::RequestTransfer => "request stock transfers",
            Capability::ApproveTransfer => "approve stock transfers",
            Capability::CancelTransfer => "cancel stock transfers",
            Capability::VoidSale => "void sales",
            Capability::AdjustStock => "adjust stock",
            Capability::ReceiveStock => "receive stock",
            Capability::RecordExpense => "record expenses",
            Capability::PostJournal => "post journal entries",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejects with `Forbidden` when `role` lacks `capability`.
///
/// ```rust
/// use till_core::policy::{authorize, Capability, Role};
///
/// assert!(authorize(Role::Cashier, Capability::CreateSale).is_ok());
/// assert!(authorize(Role::Cashier, Capability::VoidSale).is_err());
/// ```
pub fn authorize(role: Role, capability: Capability) -> CoreResult<()> {
    if role.allows(capability) {
        Ok(())
    } else {
        Err(CoreError::Forbidden {
            role: role.to_string(),
            capability: capability.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cashier_matrix() {
        assert!(Role::Cashier.allows(Capability::CreateSale));
        assert!(Role::Cashier.allows(Capability::CloseShift));
        assert!(Role::Cashier.allows(Capability::RequestTransfer));
        assert!(!Role::Cashier.allows(Capability::ApproveTransfer));
        assert!(!Role::Cashier.allows(Capability::VoidSale));
        assert!(!Role::Cashier.allows(Capability::PostJournal));
    }

    #[test]
    fn test_manager_and_owner() {
        assert!(Role::Manager.allows(Capability::ApproveTransfer));
        assert!(Role::Manager.allows(Capability::AdjustStock));
        assert!(!Role::Manager.allows(Capability::PostJournal));
        assert!(Role::Owner.allows(Capability::PostJournal));
        assert!(Role::Manager.is_supervisor());
        assert!(!Role::Cashier.is_supervisor());
    }

    #[test]
    fn test_forbidden_message() {
        let err = authorize(Role::Cashier, Capability::PostJournal).unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(
            err.to_string(),
            "Role CASHIER is not allowed to post journal entries"
        );
    }
}
