use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rollpilot_core::{Event, EventBus, hash_canonical};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameter keys that carry approval tokens; never part of the bound hash.
const TOKEN_FIELDS: [&str; 2] = ["approvalToken", "approvalTokens"];

/// A single-use authorization for one specific tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTicket {
    pub id: String,
    pub tool_name: String,
    /// Canonical hash of the tool parameters, token fields stripped.
    pub params_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Persistence for approval tickets.
///
/// `take_ticket` must fetch and delete in one atomic step: it is the only
/// thing that makes a ticket single-use under concurrent validation.
pub trait TicketStore: Send + Sync {
    fn insert_ticket(&self, ticket: &ApprovalTicket) -> rollpilot_core::Result<()>;

    fn take_ticket(&self, id: &str) -> rollpilot_core::Result<Option<ApprovalTicket>>;

    /// Drop tickets whose `expires_at` is before `now`. Returns how many were removed.
    fn purge_expired_tickets(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize>;
}

/// In-process ticket store.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<HashMap<String, ApprovalTicket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.lock().is_empty()
    }
}

impl TicketStore for MemoryTicketStore {
    fn insert_ticket(&self, ticket: &ApprovalTicket) -> rollpilot_core::Result<()> {
        self.tickets.lock().insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    fn take_ticket(&self, id: &str) -> rollpilot_core::Result<Option<ApprovalTicket>> {
        Ok(self.tickets.lock().remove(id))
    }

    fn purge_expired_tickets(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        let mut tickets = self.tickets.lock();
        let before = tickets.len();
        tickets.retain(|_, t| t.expires_at >= now);
        Ok(before - tickets.len())
    }
}

// ── Hashing ────────────────────────────────────────────────────

/// Remove approval-token fields from a parameter object, at every nesting level.
fn strip_token_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !TOKEN_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_token_fields(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_token_fields).collect()),
        other => other.clone(),
    }
}

/// Order-independent hash of tool parameters, with token fields stripped so a
/// ticket can never be bound to a call that carries itself.
pub fn hash_approval_params(params: &Value) -> String {
    hash_canonical(&strip_token_fields(params))
}

// ── Issue / validate ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueApprovalRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_params: Value,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedApproval {
    pub approval_token: String,
    pub tool_name: String,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Why a token did not authorize a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalFailure {
    MissingOrConsumed,
    ToolMismatch,
    Expired,
    ParamsMismatch,
    InsufficientApprovers { required: usize, distinct: usize },
}

impl ApprovalFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingOrConsumed => "approval_token_missing_or_consumed",
            Self::ToolMismatch => "approval_tool_mismatch",
            Self::Expired => "approval_token_expired",
            Self::ParamsMismatch => "approval_params_mismatch",
            Self::InsufficientApprovers { .. } => "approval_insufficient_approvers",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::MissingOrConsumed => "approval token not found or already used".into(),
            Self::ToolMismatch => "approval token was issued for a different tool".into(),
            Self::Expired => "approval token has expired".into(),
            Self::ParamsMismatch => "approval token was issued for different parameters".into(),
            Self::InsufficientApprovers { required, distinct } => format!(
                "{distinct} distinct approver(s) presented, {required} required"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalValidation {
    Approved { approved_by: Vec<String> },
    Rejected(ApprovalFailure),
}

impl ApprovalValidation {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    pub fn failure(&self) -> Option<&ApprovalFailure> {
        match self {
            Self::Approved { .. } => None,
            Self::Rejected(f) => Some(f),
        }
    }
}

/// Issues and consumes approval tickets.
pub struct ApprovalTicketing {
    store: Arc<dyn TicketStore>,
    default_ttl_secs: u64,
    max_ttl_secs: u64,
    events: Option<EventBus>,
}

impl ApprovalTicketing {
    pub fn new(store: Arc<dyn TicketStore>, default_ttl_secs: u64, max_ttl_secs: u64) -> Self {
        let max_ttl_secs = max_ttl_secs.max(1);
        Self {
            store,
            default_ttl_secs: default_ttl_secs.clamp(1, max_ttl_secs),
            max_ttl_secs,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Mint a ticket bound to `tool_name` and the canonical hash of `tool_params`.
    pub fn issue(
        &self,
        request: &IssueApprovalRequest,
        now: DateTime<Utc>,
    ) -> rollpilot_core::Result<IssuedApproval> {
        let ttl_secs = request
            .ttl_seconds
            .unwrap_or(self.default_ttl_secs)
            .clamp(1, self.max_ttl_secs);
        let expires_at = now + Duration::seconds(ttl_secs as i64);
        let ticket = ApprovalTicket {
            id: Uuid::new_v4().to_string(),
            tool_name: request.tool_name.clone(),
            params_hash: hash_approval_params(&request.tool_params),
            created_at: now,
            expires_at,
            approved_by: request.approved_by.clone(),
            reason: request.reason.clone(),
        };
        self.store.insert_ticket(&ticket)?;

        info!(
            tool = %ticket.tool_name,
            ttl_secs,
            approved_by = ?ticket.approved_by,
            "approval ticket issued"
        );
        if let Some(events) = &self.events {
            events.publish(Event::ApprovalIssued {
                tool_name: ticket.tool_name.clone(),
                expires_at,
            });
        }

        Ok(IssuedApproval {
            approval_token: ticket.id,
            tool_name: ticket.tool_name,
            expires_at,
            ttl_seconds: ttl_secs,
        })
    }

    /// Consume `token` and check it authorizes exactly this call.
    ///
    /// The ticket is deleted before any check runs, so a token is spent even
    /// when it turns out not to match.
    pub fn validate_and_consume(
        &self,
        token: &str,
        tool_name: &str,
        tool_params: &Value,
        now: DateTime<Utc>,
    ) -> ApprovalValidation {
        let result = match self.consume_one(token, tool_name, tool_params, now) {
            Ok(ticket) => ApprovalValidation::Approved {
                approved_by: ticket.approved_by.into_iter().collect(),
            },
            Err(failure) => ApprovalValidation::Rejected(failure),
        };
        self.report(tool_name, &result);
        result
    }

    /// Consume every token and require `min_distinct` distinct approvers.
    ///
    /// All tokens are consumed, even after the first failure.
    pub fn validate_and_consume_many(
        &self,
        tokens: &[String],
        tool_name: &str,
        tool_params: &Value,
        min_distinct: usize,
        now: DateTime<Utc>,
    ) -> ApprovalValidation {
        let mut approvers = BTreeSet::new();
        let mut first_failure = None;
        for token in tokens {
            match self.consume_one(token, tool_name, tool_params, now) {
                Ok(ticket) => {
                    if let Some(who) = ticket.approved_by {
                        approvers.insert(who);
                    }
                }
                Err(failure) => {
                    first_failure.get_or_insert(failure);
                }
            }
        }

        let result = match first_failure {
            Some(failure) => ApprovalValidation::Rejected(failure),
            None if approvers.len() < min_distinct => {
                ApprovalValidation::Rejected(ApprovalFailure::InsufficientApprovers {
                    required: min_distinct,
                    distinct: approvers.len(),
                })
            }
            None => ApprovalValidation::Approved {
                approved_by: approvers.into_iter().collect(),
            },
        };
        self.report(tool_name, &result);
        result
    }

    /// Remove expired tickets from the backing store.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> rollpilot_core::Result<usize> {
        self.store.purge_expired_tickets(now)
    }

    fn consume_one(
        &self,
        token: &str,
        tool_name: &str,
        tool_params: &Value,
        now: DateTime<Utc>,
    ) -> Result<ApprovalTicket, ApprovalFailure> {
        let ticket = match self.store.take_ticket(token) {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return Err(ApprovalFailure::MissingOrConsumed),
            Err(e) => {
                // Fail closed: an unreadable store authorizes nothing.
                warn!(error = %e, "approval ticket lookup failed");
                return Err(ApprovalFailure::MissingOrConsumed);
            }
        };
        if ticket.tool_name != tool_name {
            return Err(ApprovalFailure::ToolMismatch);
        }
        if now > ticket.expires_at {
            return Err(ApprovalFailure::Expired);
        }
        if ticket.params_hash != hash_approval_params(tool_params) {
            return Err(ApprovalFailure::ParamsMismatch);
        }
        Ok(ticket)
    }

    fn report(&self, tool_name: &str, result: &ApprovalValidation) {
        match result {
            ApprovalValidation::Approved { approved_by } => {
                info!(tool = tool_name, ?approved_by, "approval accepted");
            }
            ApprovalValidation::Rejected(failure) => {
                warn!(tool = tool_name, reason = failure.code(), "approval rejected");
            }
        }
        if let Some(events) = &self.events {
            events.publish(Event::ApprovalConsumed {
                tool_name: tool_name.to_string(),
                accepted: result.is_approved(),
            });
        }
    }
}
