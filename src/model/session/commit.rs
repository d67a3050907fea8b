//! The vote commit protocol.

use crate::{
    error::{Error, Result},
    model::store::{SubmitOutcome, TokenStore},
};

use super::{verify::USED_TOKEN, Event, Receipt, Session, TransitionError, VoteRecord};

/// Result of a commit that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { record: VoteRecord, receipt: Receipt },
    /// A vote already exists for this token.
    Conflict,
}

impl CommitOutcome {
    /// The session event for a successful commit, or the conflict error.
    pub fn into_event(self) -> Result<Event> {
        match self {
            Self::Committed { record, receipt } => Ok(Event::Committed { record, receipt }),
            Self::Conflict => Err(Error::Conflict(USED_TOKEN.to_string())),
        }
    }
}

/// Record the session's ballot.
///
/// The session must be awaiting confirmation with a complete ballot; this is
/// checked before the store is touched. Uniqueness of the vote per token is
/// left to the store, so concurrent or repeated commits are safe.
pub async fn commit(session: &Session, store: &dyn TokenStore) -> Result<CommitOutcome> {
    let Session::AwaitingConfirmation { token, selections } = session else {
        return Err(TransitionError::NotPermitted {
            stage: session.stage(),
            event: "commit",
        }
        .into());
    };
    let ballot = selections.completed().ok_or(TransitionError::Incomplete)?;

    let record = VoteRecord::new(token.clone(), &ballot);
    match store.submit_vote(&record).await? {
        SubmitOutcome::Recorded => {
            info!(
                "Vote recorded, integrity hash {}",
                record.integrity_hash.preview()
            );
            // The vote itself already makes the token count as used.
            if let Err(e) = store.mark_used(token).await {
                warn!("Vote recorded but token not marked used: {e}");
            }
            let receipt = Receipt::new(&record, &ballot);
            Ok(CommitOutcome::Committed { record, receipt })
        }
        SubmitOutcome::Conflict => {
            warn!("Rejected second vote for one token");
            Ok(CommitOutcome::Conflict)
        }
    }
}
