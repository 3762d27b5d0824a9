//! Pending query state machine.

use crate::errors::ParsePolicyError;
use serde::{Deserialize, Serialize};
use shared_types::Reply;
use std::fmt;
use std::str::FromStr;

/// What a cancelled query hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Cancelled queries report no replies.
    #[default]
    Discard,
    /// Cancelled queries report the replies gathered before cancellation.
    Deliver,
}

impl FromStr for CancelPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discard" => Ok(Self::Discard),
            "deliver" => Ok(Self::Deliver),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

/// Where a query stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Still collecting replies.
    Pending,
    /// Every addressed queryable sent its final response.
    Completed,
    /// The deadline passed first.
    TimedOut,
    /// Cancelled by the caller or by session close.
    Cancelled,
}

impl QueryStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Label used for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result handed to the caller once a query is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Terminal status.
    pub status: QueryStatus,
    /// Replies in arrival order.
    pub replies: Vec<Reply>,
}

impl QueryOutcome {
    /// Outcome with no replies.
    #[must_use]
    pub fn empty(status: QueryStatus) -> Self {
        Self {
            status,
            replies: Vec::new(),
        }
    }

    /// Successful replies only.
    pub fn samples(&self) -> impl Iterator<Item = &shared_types::Sample> {
        self.replies.iter().filter_map(Reply::sample)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    /// A reply arrived.
    Reply(Reply),
    /// One addressed queryable (or peer) finished answering.
    Final,
    /// The number of finals to wait for is now known.
    Expect(usize),
    /// The deadline passed.
    Deadline,
    /// The caller or the session cancelled.
    Cancel,
}

/// State of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingQueryState {
    /// Collecting.
    Pending {
        replies: Vec<Reply>,
        /// Finals to wait for; `None` until dispatch has counted them.
        expected: Option<usize>,
        finals: usize,
    },
    Completed,
    TimedOut,
    Cancelled,
}

impl Default for PendingQueryState {
    fn default() -> Self {
        Self::Pending {
            replies: Vec::new(),
            expected: None,
            finals: 0,
        }
    }
}

impl PendingQueryState {
    /// Current status.
    #[must_use]
    pub fn status(&self) -> QueryStatus {
        match self {
            Self::Pending { .. } => QueryStatus::Pending,
            Self::Completed => QueryStatus::Completed,
            Self::TimedOut => QueryStatus::TimedOut,
            Self::Cancelled => QueryStatus::Cancelled,
        }
    }

    /// Apply one event.
    ///
    /// Returns the outcome when this event moved the query into a terminal
    /// state. Events applied to a terminal state change nothing.
    pub fn apply(&mut self, event: QueryEvent, policy: CancelPolicy) -> Option<QueryOutcome> {
        let Self::Pending {
            replies,
            expected,
            finals,
        } = self
        else {
            return None;
        };

        let terminal = match event {
            QueryEvent::Reply(reply) => {
                replies.push(reply);
                return None;
            }
            QueryEvent::Final => {
                *finals += 1;
                Self::is_complete(*expected, *finals).then_some(QueryStatus::Completed)?
            }
            QueryEvent::Expect(count) => {
                *expected = Some(count);
                Self::is_complete(*expected, *finals).then_some(QueryStatus::Completed)?
            }
            QueryEvent::Deadline => QueryStatus::TimedOut,
            QueryEvent::Cancel => QueryStatus::Cancelled,
        };

        let mut replies = std::mem::take(replies);
        if terminal == QueryStatus::Cancelled && policy == CancelPolicy::Discard {
            replies.clear();
        }
        *self = match terminal {
            QueryStatus::Completed => Self::Completed,
            QueryStatus::TimedOut => Self::TimedOut,
            _ => Self::Cancelled,
        };
        Some(QueryOutcome {
            status: terminal,
            replies,
        })
    }

    /// Zero addressed responders never completes; only the deadline ends it.
    fn is_complete(expected: Option<usize>, finals: usize) -> bool {
        matches!(expected, Some(n) if n > 0 && finals >= n)
    }
}
