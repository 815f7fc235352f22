//! Narrow auth-facing interface `ingest` needs: a caller's role (mirroring
//! `internal/shared/domain/role.go`'s `Role`/`Score()`) and a `GraphExecutor`
//! trait standing in for whatever database ultimately runs the assembled
//! Cypher. No JWT issuance, HTTP routing, or account storage lives here —
//! that belongs to the auth service this crate deliberately does not
//! reimplement.

use async_trait::async_trait;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Unspecified,
    ReadOnly,
    Account,
    Admin,
    Entity,
}

impl Role {
    /// 4 is the highest possible score, mirroring the Go original's
    /// `Score()` method one-for-one.
    pub fn score(&self) -> u8 {
        match self {
            Role::Entity => 4,
            Role::Admin => 3,
            Role::Account => 2,
            Role::ReadOnly => 1,
            Role::Unspecified => 0,
        }
    }
}

/// The minimum role `ingest` requires, matching the "tenant account"
/// wording used for schema-upload authorization.
pub const MIN_INGEST_ROLE: Role = Role::Account;

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub id: String,
    pub role: Role,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn authorize(&self, minimum: Role) -> Result<(), IngestError> {
        if self.role.score() >= minimum.score() {
            Ok(())
        } else {
            Err(IngestError::Unauthorized)
        }
    }
}

/// Runs an assembled Cypher batch against whatever graph store backs the
/// ingest. `ingest` never talks to a database directly — it only ever
/// holds one of these.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    async fn execute(&self, cypher: &str) -> Result<(), IngestError>;
}

/// Executor used in dry runs and tests: records every statement it would
/// have sent, executes nothing.
#[derive(Default)]
pub struct RecordingExecutor {
    pub statements: tokio::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl GraphExecutor for RecordingExecutor {
    async fn execute(&self, cypher: &str) -> Result<(), IngestError> {
        self.statements.lock().await.push(cypher.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_role_meets_minimum_ingest_role() {
        let caller = CallerIdentity::new("acct-1", Role::Account);
        assert!(caller.authorize(MIN_INGEST_ROLE).is_ok());
    }

    #[test]
    fn read_only_role_is_rejected() {
        let caller = CallerIdentity::new("acct-1", Role::ReadOnly);
        assert!(matches!(
            caller.authorize(MIN_INGEST_ROLE),
            Err(IngestError::Unauthorized)
        ));
    }

    #[test]
    fn entity_outranks_account() {
        assert!(Role::Entity.score() > Role::Account.score());
    }
}
