use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::Config,
    error::{Error, Result},
    scheduled_task::ScheduledTask,
};

use super::{Event, RequiredCategories, Session, SessionId, Stage};

struct Entry {
    session: Session,
    /// Bumped on every commit and every reset, so a pending auto-end can
    /// tell whether it still refers to the same committed vote.
    generation: u64,
    auto_end: Option<ScheduledTask<()>>,
    touched: DateTime<Utc>,
}

impl Entry {
    fn new() -> Self {
        Self {
            session: Session::new(),
            generation: 0,
            auto_end: None,
            touched: Utc::now(),
        }
    }

    fn cancel_auto_end(&mut self) {
        if let Some(task) = self.auto_end.take() {
            task.abort();
        }
    }
}

/// All live kiosk sessions. Each transition happens under one lock, so
/// concurrent requests for a session are applied one at a time.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, Entry>>>,
    categories: RequiredCategories,
    feedback_timeout: Duration,
    session_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        Self::with_timeouts(
            config.required_categories().clone(),
            config.feedback_timeout(),
            config.session_ttl(),
        )
    }

    pub fn with_timeouts(
        categories: RequiredCategories,
        feedback_timeout: Duration,
        session_ttl: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            categories,
            feedback_timeout,
            session_ttl,
        }
    }

    /// The categories every session's ballot must fill.
    pub fn categories(&self) -> &RequiredCategories {
        &self.categories
    }

    /// Open a new idle session, dropping any that have gone stale.
    pub fn start(&self) -> SessionId {
        let mut sessions = self.lock();
        let cutoff = Utc::now() - self.session_ttl;
        sessions.retain(|id, entry| {
            let live = entry.touched >= cutoff;
            if !live {
                debug!("Dropping stale session {id}");
                entry.cancel_auto_end();
            }
            live
        });

        let id = SessionId::random();
        sessions.insert(id, Entry::new());
        info!("Started session {id}");
        id
    }

    pub fn get(&self, id: SessionId) -> Result<Session> {
        self.lock()
            .get(&id)
            .map(|entry| entry.session.clone())
            .ok_or_else(unknown_session)
    }

    /// Apply `event` to a session. On error the session is unchanged.
    pub fn apply(&self, id: SessionId, event: Event) -> Result<Session> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(&id).ok_or_else(unknown_session)?;
        self.advance(id, entry, event)
    }

    fn advance(&self, id: SessionId, entry: &mut Entry, event: Event) -> Result<Session> {
        let before = entry.session.stage();
        let mut next = entry.session.apply(event)?;
        entry.touched = Utc::now();

        if next.stage() == Stage::Terminated {
            info!("Session {id} ended");
            next = Session::new();
        }
        if next.stage() == Stage::AwaitingToken && before != Stage::AwaitingToken {
            entry.generation += 1;
            entry.cancel_auto_end();
        }
        if before == Stage::AwaitingConfirmation && next.stage() == Stage::Committed {
            entry.generation += 1;
            self.schedule_auto_end(id, entry);
        }
        if before != next.stage() {
            debug!("Session {id}: {before} -> {}", next.stage());
        }

        entry.session = next.clone();
        Ok(next)
    }

    fn schedule_auto_end(&self, id: SessionId, entry: &mut Entry) {
        entry.cancel_auto_end();
        let registry = self.clone();
        let generation = entry.generation;
        let run_at = Utc::now() + self.feedback_timeout;
        entry.auto_end = Some(ScheduledTask::new(
            async move { registry.expire(id, generation) },
            run_at,
        ));
    }

    /// End a committed session whose feedback window has run out.
    fn expire(&self, id: SessionId, generation: u64) {
        let mut sessions = self.lock();
        let Some(entry) = sessions.get_mut(&id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        // This is the running task; dropping the handle does not cancel it.
        entry.auto_end = None;
        match self.advance(id, entry, Event::End) {
            Ok(_) => info!("Session {id} timed out after commit"),
            Err(e) => debug!("Session {id} not ended by timeout: {e}"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unknown_session() -> Error {
    Error::Unauthorized("This kiosk session has expired. Please start again.".to_string())
}

#[cfg(test)]
mod tests {
    use rocket::tokio::time::{sleep, Duration as StdDuration};

    use super::*;
    use crate::model::session::{Choice, Receipt, VoteRecord, VoteToken};

    fn registry(feedback_timeout: Duration) -> SessionRegistry {
        SessionRegistry::with_timeouts(
            RequiredCategories::example(),
            feedback_timeout,
            Duration::hours(1),
        )
    }

    fn commit_event(session: &Session) -> Event {
        let ballot = session.selections().unwrap().completed().unwrap();
        let record = VoteRecord::new(session.token().unwrap().clone(), &ballot);
        let receipt = Receipt::new(&record, &ballot);
        Event::Committed { record, receipt }
    }

    fn drive_to_committed(registry: &SessionRegistry, id: SessionId) -> Session {
        registry
            .apply(id, Event::SubmitToken(VoteToken::example()))
            .unwrap();
        registry
            .apply(
                id,
                Event::Verified {
                    token: VoteToken::example(),
                    categories: registry.categories().clone(),
                },
            )
            .unwrap();
        registry
            .apply(id, Event::Select(Choice::example_mna()))
            .unwrap();
        let confirming = registry
            .apply(id, Event::Select(Choice::example_mpa()))
            .unwrap();
        registry.apply(id, commit_event(&confirming)).unwrap()
    }

    #[rocket::async_test]
    async fn sessions_are_independent() {
        let registry = registry(Duration::minutes(2));
        let a = registry.start();
        let b = registry.start();
        registry
            .apply(a, Event::SubmitToken(VoteToken::example()))
            .unwrap();

        assert_eq!(registry.get(a).unwrap().stage(), Stage::Verifying);
        assert_eq!(registry.get(b).unwrap().stage(), Stage::AwaitingToken);
    }

    #[rocket::async_test]
    async fn unknown_session_rejected() {
        let registry = registry(Duration::minutes(2));
        let err = registry.get(SessionId::random()).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[rocket::async_test]
    async fn rejected_event_changes_nothing() {
        let registry = registry(Duration::minutes(2));
        let id = registry.start();
        let err = registry.apply(id, Event::Proceed).unwrap_err();
        assert!(matches!(err, Error::Transition(_)));
        assert_eq!(registry.get(id).unwrap(), Session::new());
    }

    #[rocket::async_test]
    async fn end_resets_to_awaiting_token() {
        let registry = registry(Duration::minutes(2));
        let id = registry.start();
        drive_to_committed(&registry, id);

        let after = registry.apply(id, Event::End).unwrap();
        assert_eq!(after, Session::new());
        assert_eq!(after.token(), None);
    }

    #[rocket::async_test]
    async fn committed_session_ends_itself() {
        let registry = registry(Duration::milliseconds(20));
        let id = registry.start();
        drive_to_committed(&registry, id);
        registry.apply(id, Event::BeginFeedback).unwrap();

        sleep(StdDuration::from_millis(200)).await;
        assert_eq!(registry.get(id).unwrap(), Session::new());
    }

    #[rocket::async_test]
    async fn stale_timer_does_not_end_next_vote() {
        let registry = registry(Duration::milliseconds(150));
        let id = registry.start();
        drive_to_committed(&registry, id);
        registry.apply(id, Event::End).unwrap();

        sleep(StdDuration::from_millis(100)).await;
        // Same kiosk, next voter (a fresh token in a real deployment).
        drive_to_committed(&registry, id);

        // The first vote's timer would have fired by now.
        sleep(StdDuration::from_millis(80)).await;
        assert_eq!(registry.get(id).unwrap().stage(), Stage::Committed);

        sleep(StdDuration::from_millis(250)).await;
        assert_eq!(registry.get(id).unwrap().stage(), Stage::AwaitingToken);
    }

    #[rocket::async_test]
    async fn stale_sessions_pruned_on_start() {
        let registry = SessionRegistry::with_timeouts(
            RequiredCategories::example(),
            Duration::minutes(2),
            Duration::zero(),
        );
        let old = registry.start();
        sleep(StdDuration::from_millis(10)).await;
        registry.start();
        assert!(registry.get(old).is_err());
    }
}
