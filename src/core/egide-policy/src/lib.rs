//! # Egide Policy
//!
//! Policy evaluation engine: stores named allow/deny statements bound to
//! entities and evaluates them against secret-path requests.
//!
//! Selection requires an explicit, non-empty `entity_bindings` list — a
//! policy with no bindings applies to nobody. Evaluation is deny-first:
//! any matching `deny` statement wins regardless of how many `allow`
//! statements also match, and an unmatched request is denied by default.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod conditions;
pub mod error;
pub mod glob;

use std::path::Path;

use conditions::{trace, ConditionStep};
use egide_storage_sqlite::SqliteBackend;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use conditions::{Conditions, RequestContext};
pub use error::PolicyError;

/// Whether a statement grants or denies the operations it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Grants access when the statement matches.
    Allow,
    /// Denies access when the statement matches, overriding any allow.
    Deny,
}

/// Operations a policy statement can authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Read a secret's current value.
    Read,
    /// Create or update a secret.
    Write,
    /// Delete a secret or prune its versions.
    Delete,
    /// List secrets under a path prefix.
    List,
}

/// A single match rule within a policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    /// Dotted-segment glob the request path must match.
    pub path_pattern: String,
    /// Operations this statement covers.
    pub operations: Vec<Operation>,
    /// Allow or deny.
    pub effect: Effect,
    /// Conditions all of which must pass for the statement to match.
    #[serde(default)]
    pub conditions: Conditions,
}

/// The body of a policy: an ordered list of statements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Statements evaluated against a request.
    pub statements: Vec<Statement>,
}

/// A named, storable policy.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Unique policy name.
    pub name: String,
    /// The statements this policy carries.
    pub document: PolicyDocument,
    /// Entities this policy is bound to. Empty means the policy applies to
    /// nobody until bindings are added.
    pub entity_bindings: Vec<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PolicyRow {
    name: String,
    document: String,
    entity_bindings: String,
}

impl TryFrom<PolicyRow> for Policy {
    type Error = PolicyError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        let document: PolicyDocument = serde_json::from_str(&row.document)
            .map_err(|e| PolicyError::Storage(format!("corrupt policy document: {e}")))?;
        let entity_bindings: Vec<String> = serde_json::from_str(&row.entity_bindings)
            .map_err(|e| PolicyError::Storage(format!("corrupt entity bindings: {e}")))?;
        Ok(Policy {
            name: row.name,
            document,
            entity_bindings,
        })
    }
}

/// The outcome of evaluating a request against the selected policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Access granted by the named policy.
    Allow {
        /// Name of the policy whose statement allowed the request.
        policy_name: String,
    },
    /// Access denied, either by an explicit deny statement or by default.
    Deny {
        /// Human-readable reason, e.g. a policy name or `"no matching policy"`.
        reason: String,
    },
}

/// A single step of a [`PolicyStore::simulate`] trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationStep {
    /// Name of the policy being considered.
    pub policy_name: String,
    /// Which statement (by index) within the policy.
    pub statement_index: usize,
    /// Whether the path/operation glob matched at all.
    pub path_matched: bool,
    /// Per-condition results, in fixed evaluation order.
    pub condition_steps: Vec<ConditionStep>,
    /// Whether this statement fully matched (path + all conditions).
    pub matched: bool,
}

/// Full result of a [`PolicyStore::simulate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationResult {
    /// Every statement considered, across every selected policy, in order.
    pub steps: Vec<SimulationStep>,
    /// The final decision, identical to what `evaluate_access` would return.
    pub decision: Decision,
}

/// Owns the policy table and implements selection + evaluation.
pub struct PolicyStore {
    storage: SqliteBackend,
}

impl PolicyStore {
    /// Opens (creating if necessary) the policy store at `data_path`.
    pub async fn open(data_path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let storage = SqliteBackend::open(data_path, "policy").await?;
        let store = Self { storage };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PolicyError> {
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS policies (
                    name            TEXT PRIMARY KEY,
                    document        TEXT NOT NULL,
                    entity_bindings TEXT NOT NULL
                )
                "#,
            )
            .await?;
        Ok(())
    }

    /// Creates a new named policy. Fails if `name` is already taken.
    pub async fn create_policy(
        &self,
        name: &str,
        document: PolicyDocument,
        entity_bindings: Vec<String>,
    ) -> Result<(), PolicyError> {
        let existing: Option<PolicyRow> = self
            .storage
            .query_one("SELECT name, document, entity_bindings FROM policies WHERE name = ?", &[name])
            .await?;
        if existing.is_some() {
            return Err(PolicyError::AlreadyExists(name.to_string()));
        }

        let document_json = serde_json::to_string(&document)
            .map_err(|e| PolicyError::InvalidPolicy(e.to_string()))?;
        let bindings_json = serde_json::to_string(&entity_bindings)
            .map_err(|e| PolicyError::InvalidPolicy(e.to_string()))?;

        self.storage
            .execute(
                "INSERT INTO policies (name, document, entity_bindings) VALUES (?, ?, ?)",
                &[name, &document_json, &bindings_json],
            )
            .await?;

        debug!(policy = name, "policy created");
        Ok(())
    }

    /// Replaces the document and/or bindings of an existing policy.
    pub async fn update_policy(
        &self,
        name: &str,
        document: PolicyDocument,
        entity_bindings: Vec<String>,
    ) -> Result<(), PolicyError> {
        self.get_policy(name).await?;

        let document_json = serde_json::to_string(&document)
            .map_err(|e| PolicyError::InvalidPolicy(e.to_string()))?;
        let bindings_json = serde_json::to_string(&entity_bindings)
            .map_err(|e| PolicyError::InvalidPolicy(e.to_string()))?;

        self.storage
            .execute(
                "UPDATE policies SET document = ?, entity_bindings = ? WHERE name = ?",
                &[&document_json, &bindings_json, name],
            )
            .await?;
        Ok(())
    }

    /// Deletes a policy by name.
    pub async fn delete_policy(&self, name: &str) -> Result<(), PolicyError> {
        self.get_policy(name).await?;
        self.storage
            .execute("DELETE FROM policies WHERE name = ?", &[name])
            .await?;
        Ok(())
    }

    /// Fetches a policy by name.
    pub async fn get_policy(&self, name: &str) -> Result<Policy, PolicyError> {
        let row: Option<PolicyRow> = self
            .storage
            .query_one(
                "SELECT name, document, entity_bindings FROM policies WHERE name = ?",
                &[name],
            )
            .await?;
        row.ok_or_else(|| PolicyError::NotFound(name.to_string()))?
            .try_into()
    }

    /// Returns the policies bound to `entity_id`. A policy with empty
    /// `entity_bindings` is never selected.
    async fn selected_for(&self, entity_id: &str) -> Result<Vec<Policy>, PolicyError> {
        let rows: Vec<PolicyRow> = self
            .storage
            .query_all("SELECT name, document, entity_bindings FROM policies", &[])
            .await?;

        rows.into_iter()
            .map(Policy::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map(|policies| {
                policies
                    .into_iter()
                    .filter(|p| {
                        !p.entity_bindings.is_empty()
                            && p.entity_bindings.iter().any(|b| b == entity_id)
                    })
                    .collect()
            })
    }

    /// Evaluates `(entity_id, path, op, ctx)` against the entity's bound
    /// policies. Deny statements are checked first across every selected
    /// policy; only if none match is the first matching allow statement
    /// applied. No match at all is a default deny.
    pub async fn evaluate_access(
        &self,
        entity_id: &str,
        path: &str,
        op: Operation,
        ctx: &RequestContext,
    ) -> Result<Decision, PolicyError> {
        let policies = self.selected_for(entity_id).await?;

        for policy in &policies {
            for statement in &policy.document.statements {
                if statement.effect == Effect::Deny && statement_matches(statement, path, op, ctx)
                {
                    return Ok(Decision::Deny {
                        reason: policy.name.clone(),
                    });
                }
            }
        }

        for policy in &policies {
            for statement in &policy.document.statements {
                if statement.effect == Effect::Allow
                    && statement_matches(statement, path, op, ctx)
                {
                    return Ok(Decision::Allow {
                        policy_name: policy.name.clone(),
                    });
                }
            }
        }

        Ok(Decision::Deny {
            reason: "no matching policy".to_string(),
        })
    }

    /// Like [`Self::evaluate_access`] but records every statement considered
    /// (across every selected policy, deny pass then allow pass) instead of
    /// stopping at the first match.
    pub async fn simulate(
        &self,
        entity_id: &str,
        path: &str,
        op: Operation,
        ctx: &RequestContext,
    ) -> Result<SimulationResult, PolicyError> {
        let policies = self.selected_for(entity_id).await?;
        let mut steps = Vec::new();
        let mut decision = None;

        for effect in [Effect::Deny, Effect::Allow] {
            for policy in &policies {
                for (idx, statement) in policy.document.statements.iter().enumerate() {
                    if statement.effect != effect {
                        continue;
                    }

                    let path_matched =
                        glob::matches(&statement.path_pattern, path) && statement.operations.contains(&op);
                    let condition_steps = trace(&statement.conditions, ctx);
                    let conditions_pass = condition_steps.iter().all(|s| s.pass);
                    let matched = path_matched && conditions_pass;

                    steps.push(SimulationStep {
                        policy_name: policy.name.clone(),
                        statement_index: idx,
                        path_matched,
                        condition_steps,
                        matched,
                    });

                    if matched && decision.is_none() {
                        decision = Some(match effect {
                            Effect::Deny => Decision::Deny {
                                reason: policy.name.clone(),
                            },
                            Effect::Allow => Decision::Allow {
                                policy_name: policy.name.clone(),
                            },
                        });
                    }
                }
            }
        }

        let decision = decision.unwrap_or(Decision::Deny {
            reason: "no matching policy".to_string(),
        });

        Ok(SimulationResult { steps, decision })
    }
}

fn statement_matches(statement: &Statement, path: &str, op: Operation, ctx: &RequestContext) -> bool {
    statement.operations.contains(&op)
        && glob::matches(&statement.path_pattern, path)
        && conditions::evaluate(&statement.conditions, ctx)
}
