//! The per-request context snapshot.
//!
//! Built once per inbound message by the ContextBuilder and treated as
//! read-only afterwards: every downstream stage reasons over the same
//! snapshot, so one request always sees one consistent view of memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenancy key threaded through every storage call.
///
/// Every query touching business data is filtered by `org_id`; session and
/// confirmation rows are additionally keyed by `(room_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub org_id: String,
    pub room_id: String,
    pub user_id: String,
}

impl Scope {
    pub fn new(org_id: &str, room_id: &str, user_id: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

/// Who contributed a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of the recent conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Where a memory excerpt came from and how much we trust it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Who taught or created the entry (user id or "system").
    pub taught_by: String,
    pub taught_at: DateTime<Utc>,
    /// Trust in [0,1]; user-stated facts carry 1.0.
    pub confidence: f64,
}

impl Provenance {
    pub fn user_stated(user_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            taught_by: user_id.to_string(),
            taught_at: at,
            confidence: 1.0,
        }
    }
}

/// A person the user has mentioned or works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonMemory {
    pub name: String,
    pub relation: String,
    pub note: String,
    pub provenance: Provenance,
}

/// A tracked goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalMemory {
    pub id: i64,
    pub title: String,
    pub progress_pct: u8,
    pub due: Option<DateTime<Utc>>,
    pub provenance: Provenance,
}

/// A tracked task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMemory {
    pub id: i64,
    pub title: String,
    pub done: bool,
    pub due: Option<DateTime<Utc>>,
    pub provenance: Provenance,
}

/// A learned rule or fact ("teaching").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teaching {
    pub id: i64,
    pub content: String,
    pub provenance: Provenance,
}

/// A declared value axis (what the user says matters to them), with any
/// explicit prior decisions attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueAxis {
    pub name: String,
    pub statement: String,
    /// Phrases that directly contradict an explicit prior decision on this
    /// axis. A match is a hard conflict.
    pub hard_rules: Vec<String>,
    /// Thematically related keywords. A match is a soft conflict.
    pub themes: Vec<String>,
    pub provenance: Provenance,
}

/// A persisted long-term commitment the user has made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub summary: String,
    pub hard_rules: Vec<String>,
    pub themes: Vec<String>,
    pub decided_at: DateTime<Utc>,
    pub provenance: Provenance,
}

/// Immutable context for one inbound message.
///
/// All lists are bounded by the builder; missing memory sources show up as
/// empty lists, never as an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub scope: Scope,
    pub display_name: String,
    /// Last N turns, oldest first. Insertion order significant.
    pub recent_turns: Vec<ConversationTurn>,
    pub people: Vec<PersonMemory>,
    pub goals: Vec<GoalMemory>,
    pub tasks: Vec<TaskMemory>,
    pub teachings: Vec<Teaching>,
    pub value_axes: Vec<ValueAxis>,
    pub commitments: Vec<Commitment>,
    pub built_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// A minimal snapshot with empty memory fields: the fail-closed result
    /// when memory sources are unavailable.
    pub fn minimal(scope: Scope, display_name: &str) -> Self {
        Self {
            scope,
            display_name: display_name.to_string(),
            recent_turns: Vec::new(),
            people: Vec::new(),
            goals: Vec::new(),
            tasks: Vec::new(),
            teachings: Vec::new(),
            value_axes: Vec::new(),
            commitments: Vec::new(),
            built_at: Utc::now(),
        }
    }

    /// A copy with the bulkier excerpts dropped, used for the reduced-scope
    /// retry after an LLM failure. Oldest conversation turns go first, then
    /// people and teachings.
    pub fn reduced(&self) -> Self {
        let mut out = self.clone();
        let keep = out.recent_turns.len() / 2;
        out.recent_turns = out
            .recent_turns
            .split_off(out.recent_turns.len() - keep);
        out.people.clear();
        out.teachings.clear();
        out
    }

    /// Total number of memory excerpts across all lists.
    pub fn excerpt_count(&self) -> usize {
        self.people.len()
            + self.goals.len()
            + self.tasks.len()
            + self.teachings.len()
            + self.value_axes.len()
            + self.commitments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_turns(n: usize) -> ContextSnapshot {
        let mut snap = ContextSnapshot::minimal(Scope::new("org", "room", "user"), "Tester");
        for i in 0..n {
            snap.recent_turns.push(ConversationTurn {
                role: TurnRole::User,
                text: format!("turn {}", i),
                at: Utc::now(),
            });
        }
        snap.people.push(PersonMemory {
            name: "佐藤".to_string(),
            relation: "manager".to_string(),
            note: "weekly 1on1".to_string(),
            provenance: Provenance::user_stated("user", Utc::now()),
        });
        snap
    }

    #[test]
    fn test_minimal_is_empty() {
        let snap = ContextSnapshot::minimal(Scope::new("o", "r", "u"), "x");
        assert!(snap.recent_turns.is_empty());
        assert_eq!(snap.excerpt_count(), 0);
    }

    #[test]
    fn test_reduced_drops_oldest_turns_first() {
        let snap = snapshot_with_turns(6);
        let reduced = snap.reduced();
        assert_eq!(reduced.recent_turns.len(), 3);
        // The newest turns survive.
        assert_eq!(reduced.recent_turns[0].text, "turn 3");
        assert!(reduced.people.is_empty());
        assert!(reduced.teachings.is_empty());
    }

    #[test]
    fn test_reduced_of_empty_is_empty() {
        let snap = ContextSnapshot::minimal(Scope::new("o", "r", "u"), "x");
        let reduced = snap.reduced();
        assert!(reduced.recent_turns.is_empty());
    }
}
