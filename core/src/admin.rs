//! Minimal admin authorization model (spec §9 Open Question 3: `force_resolve`
//! is unguarded in source; this workspace requires an allow-listed admin
//! identity for every admin-only operation rather than leaving it unguarded).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminIdentity(pub String);

#[derive(Debug, Clone, Default)]
pub struct AdminRegistry {
  allowed: HashSet<AdminIdentity>,
}

impl AdminRegistry {
  pub fn new(allowed: impl IntoIterator<Item = AdminIdentity>) -> Self {
    Self { allowed: allowed.into_iter().collect() }
  }

  pub fn authorize(&self, identity: &AdminIdentity) -> CoreResult<()> {
    if self.allowed.contains(identity) {
      Ok(())
    } else {
      Err(CoreError::AuthorizationDenied(format!("admin `{}` is not on the allow list", identity.0)))
    }
  }
}
