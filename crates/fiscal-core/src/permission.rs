//! # Roles and Capabilities
//!
//! The engine receives an authenticated [`Actor`] from the session
//! collaborator and checks one capability at each aggregate boundary.
//!
//! ```text
//! ┌──────────────────┬───────┬─────────┬────────┬─────────┐
//! │ Capability       │ Admin │ Manager │ Cashier│ Waiter  │
//! ├──────────────────┼───────┼─────────┼────────┼─────────┤
//! │ EditSale         │   ✓   │    ✓    │   ✓    │    ✓    │
//! │ FinalizeSale     │   ✓   │         │   ✓    │         │
//! │ CancelSale       │   ✓   │    ✓    │   ✓    │         │
//! │ IssueNote        │   ✓   │    ✓    │        │         │
//! │ AdjustStock      │   ✓   │    ✓    │        │         │
//! │ ManageSequences  │   ✓   │         │        │         │
//! └──────────────────┴───────┴─────────┴────────┴─────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

/// Closed set of user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    Manager,
    Cashier,
    Waiter,
}

/// Something an actor may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create a sale, add/remove/update lines, set customer or service charge.
    EditSale,
    FinalizeSale,
    CancelSale,
    /// Issue credit or debit notes.
    IssueNote,
    AdjustStock,
    /// Create, activate, deactivate or extend NCF sequences.
    ManageSequences,
}

impl Role {
    /// Whether this role holds the capability.
    pub fn can(&self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Administrator => true,
            Role::Manager => matches!(capability, EditSale | CancelSale | IssueNote | AdjustStock),
            Role::Cashier => matches!(capability, EditSale | FinalizeSale | CancelSale),
            Role::Waiter => matches!(capability, EditSale),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }

    /// Fails with `PermissionDenied` unless the role holds the capability.
    pub fn authorize(&self, capability: Capability) -> CoreResult<()> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied {
                role: self.role,
                capability,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_capability_matrix() {
        assert!(Role::Cashier.can(Capability::FinalizeSale));
        assert!(!Role::Waiter.can(Capability::FinalizeSale));
        assert!(!Role::Manager.can(Capability::FinalizeSale));
        assert!(Role::Manager.can(Capability::IssueNote));
        assert!(!Role::Cashier.can(Capability::IssueNote));
        assert!(!Role::Manager.can(Capability::ManageSequences));
        assert!(Role::Administrator.can(Capability::ManageSequences));
        assert!(Role::Waiter.can(Capability::EditSale));
    }

    #[test]
    fn test_authorize() {
        let waiter = Actor::new("u-1", Role::Waiter);
        let err = waiter.authorize(Capability::CancelSale).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(Actor::new("u-2", Role::Cashier)
            .authorize(Capability::CancelSale)
            .is_ok());
    }
}
