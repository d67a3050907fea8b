//! The kiosk voter session: an explicit state machine advanced by pure
//! transitions, plus the protocols that drive it against the token store
//! and the verification gateway.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::gateway::IdentityArtifacts;

pub mod commit;
pub mod cookie;
pub mod registry;
pub mod selection;
pub mod verify;

mod record;
mod token;

pub use record::{Completed, IntegrityHash, Receipt, VoteRecord};
pub use registry::SessionRegistry;
pub use selection::{Category, Choice, CompletedBallot, RequiredCategories, SelectionSet};
pub use token::{EmptyToken, SessionId, VoteToken};

/// The stages a session moves through, in order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AwaitingToken,
    Verifying,
    AwaitingSelections,
    AwaitingConfirmation,
    Committed,
    Feedback,
    Terminated,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingToken => "awaiting token",
            Self::Verifying => "verifying",
            Self::AwaitingSelections => "awaiting selections",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Committed => "committed",
            Self::Feedback => "feedback",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// One voter's progress through the kiosk. Each variant holds exactly the
/// data valid at that stage, so a token exists iff the voter has been
/// verified and the session has not ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    AwaitingToken {
        /// Why the previous attempt failed, if it did.
        notice: Option<String>,
    },
    Verifying {
        /// Present when verifying by identity capture rather than by token.
        artifacts: Option<IdentityArtifacts>,
    },
    AwaitingSelections {
        token: VoteToken,
        selections: SelectionSet,
    },
    AwaitingConfirmation {
        token: VoteToken,
        selections: SelectionSet,
    },
    Committed {
        token: VoteToken,
        receipt: Receipt,
    },
    Feedback {
        token: VoteToken,
        receipt: Receipt,
    },
    Terminated,
}

/// Everything that can happen to a session.
#[derive(Debug, Clone)]
pub enum Event {
    SubmitToken(VoteToken),
    SubmitIdentity(IdentityArtifacts),
    Verified {
        token: VoteToken,
        categories: RequiredCategories,
    },
    VerificationFailed {
        reason: String,
    },
    Select(Choice),
    Proceed,
    GoBack,
    Committed {
        record: VoteRecord,
        receipt: Receipt,
    },
    BeginFeedback,
    CancelFeedback,
    End,
    Restart,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Self::SubmitToken(_) => "submit token",
            Self::SubmitIdentity(_) => "submit identity",
            Self::Verified { .. } => "verification success",
            Self::VerificationFailed { .. } => "verification failure",
            Self::Select(_) => "select candidate",
            Self::Proceed => "proceed to confirmation",
            Self::GoBack => "go back",
            Self::Committed { .. } => "commit",
            Self::BeginFeedback => "begin feedback",
            Self::CancelFeedback => "cancel feedback",
            Self::End => "end session",
            Self::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot {event} while the session is {stage}")]
    NotPermitted { stage: Stage, event: &'static str },
    #[error("'{0}' is not a race on this ballot")]
    UnknownCategory(Category),
    #[error("A candidate must be chosen for every race before confirming")]
    Incomplete,
    #[error("The committed vote belongs to a different token")]
    TokenMismatch,
}

impl TransitionError {
    /// Errors caused by bad input rather than by acting out of order.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownCategory(_))
    }
}

impl From<selection::SelectionError> for TransitionError {
    fn from(err: selection::SelectionError) -> Self {
        match err {
            selection::SelectionError::UnknownCategory(category) => Self::UnknownCategory(category),
            // A session's categories are fixed when it is verified.
            selection::SelectionError::NoCategories => Self::Incomplete,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh, idle session.
    pub fn new() -> Self {
        Self::AwaitingToken { notice: None }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::AwaitingToken { .. } => Stage::AwaitingToken,
            Self::Verifying { .. } => Stage::Verifying,
            Self::AwaitingSelections { .. } => Stage::AwaitingSelections,
            Self::AwaitingConfirmation { .. } => Stage::AwaitingConfirmation,
            Self::Committed { .. } => Stage::Committed,
            Self::Feedback { .. } => Stage::Feedback,
            Self::Terminated => Stage::Terminated,
        }
    }

    pub fn token(&self) -> Option<&VoteToken> {
        match self {
            Self::AwaitingSelections { token, .. }
            | Self::AwaitingConfirmation { token, .. }
            | Self::Committed { token, .. }
            | Self::Feedback { token, .. } => Some(token),
            Self::AwaitingToken { .. } | Self::Verifying { .. } | Self::Terminated => None,
        }
    }

    pub fn selections(&self) -> Option<&SelectionSet> {
        match self {
            Self::AwaitingSelections { selections, .. }
            | Self::AwaitingConfirmation { selections, .. } => Some(selections),
            _ => None,
        }
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Committed { receipt, .. } | Self::Feedback { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<&str> {
        match self {
            Self::AwaitingToken { notice } => notice.as_deref(),
            _ => None,
        }
    }

    /// Compute the session that results from `event`. The current session is
    /// left untouched, so a rejected event changes nothing.
    pub fn apply(&self, event: Event) -> Result<Session, TransitionError> {
        let not_permitted = |event: &Event| TransitionError::NotPermitted {
            stage: self.stage(),
            event: event.name(),
        };

        let next = match (self, event) {
            (_, Event::Restart) => Session::new(),

            (Self::AwaitingToken { .. }, Event::SubmitToken(_)) => {
                Session::Verifying { artifacts: None }
            }
            (Self::AwaitingToken { .. }, Event::SubmitIdentity(artifacts)) => Session::Verifying {
                artifacts: Some(artifacts),
            },

            // Leaving `Verifying` drops any captured images.
            (Self::Verifying { .. }, Event::Verified { token, categories }) => {
                Session::AwaitingSelections {
                    token,
                    selections: SelectionSet::new(categories),
                }
            }
            (Self::Verifying { .. }, Event::VerificationFailed { reason }) => {
                Session::AwaitingToken {
                    notice: Some(reason),
                }
            }

            (Self::AwaitingSelections { token, selections }, Event::Select(choice)) => {
                let mut selections = selections.clone();
                if selections.record_choice(choice)? {
                    Session::AwaitingConfirmation {
                        token: token.clone(),
                        selections,
                    }
                } else {
                    Session::AwaitingSelections {
                        token: token.clone(),
                        selections,
                    }
                }
            }
            (Self::AwaitingSelections { token, selections }, Event::Proceed) => {
                if !selections.is_complete() {
                    return Err(TransitionError::Incomplete);
                }
                Session::AwaitingConfirmation {
                    token: token.clone(),
                    selections: selections.clone(),
                }
            }

            (Self::AwaitingConfirmation { token, selections }, Event::GoBack) => {
                Session::AwaitingSelections {
                    token: token.clone(),
                    selections: selections.clone(),
                }
            }
            (Self::AwaitingConfirmation { token, .. }, Event::Committed { record, receipt }) => {
                if &record.token != token {
                    return Err(TransitionError::TokenMismatch);
                }
                Session::Committed {
                    token: record.token,
                    receipt,
                }
            }

            (Self::Committed { token, receipt }, Event::BeginFeedback) => Session::Feedback {
                token: token.clone(),
                receipt: receipt.clone(),
            },
            (Self::Feedback { token, receipt }, Event::CancelFeedback) => Session::Committed {
                token: token.clone(),
                receipt: receipt.clone(),
            },
            (Self::Committed { .. } | Self::Feedback { .. }, Event::End) => Session::Terminated,

            (_, event) => return Err(not_permitted(&event)),
        };

        Ok(next)
    }
}
