use rand::rngs::OsRng;
use rocket::{http::CookieJar, serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        catalogue::CandidateId,
        feedback::{Feedback, FeedbackRequest},
        gateway::{IdentityRequest, VerificationGateway},
        session::{
            commit::commit,
            cookie::SessionCookie,
            verify::{verify_identity, verify_token},
            Choice, Event, Receipt, RequiredCategories, Session, SessionId, SessionRegistry,
            SelectionSet, Stage, TransitionError, VoteToken,
        },
        store::{Catalogue, TokenStore},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        start,
        view,
        submit_token,
        submit_identity,
        select,
        proceed,
        go_back,
        commit_vote,
        begin_feedback,
        cancel_feedback,
        submit_feedback,
        end,
        restart,
    ]
}

/// What the kiosk front end renders.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub stage: Stage,
    pub token: Option<VoteToken>,
    pub required_categories: RequiredCategories,
    pub choices: Vec<Choice>,
    pub complete: bool,
    /// Why the last verification failed.
    pub notice: Option<String>,
    pub receipt: Option<Receipt>,
}

impl SessionView {
    pub fn new(session: &Session, categories: &RequiredCategories) -> Self {
        let selections = session.selections();
        let receipt = session.receipt().cloned();
        let choices = match (selections, &receipt) {
            (Some(selections), _) => selections.choices().cloned().collect(),
            (None, Some(receipt)) => receipt.choices.clone(),
            (None, None) => Vec::new(),
        };

        Self {
            stage: session.stage(),
            token: session.token().cloned(),
            required_categories: categories.clone(),
            choices,
            complete: selections.map_or(receipt.is_some(), SelectionSet::is_complete),
            notice: session.notice().map(str::to_string),
            receipt,
        }
    }
}

#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct SelectRequest {
    pub candidate: CandidateId,
}

fn render(session: &Session, registry: &SessionRegistry) -> Json<SessionView> {
    Json(SessionView::new(session, registry.categories()))
}

/// Feed a verification result back into the session. On failure the session
/// returns to `AwaitingToken` carrying the reason, and the error is passed on.
fn settle_verification(
    registry: &SessionRegistry,
    id: SessionId,
    result: Result<VoteToken>,
) -> Result<Session> {
    match result {
        Ok(token) => registry.apply(
            id,
            Event::Verified {
                token,
                categories: registry.categories().clone(),
            },
        ),
        Err(err) => {
            info!("Verification failed for session {id}: {err}");
            registry.apply(
                id,
                Event::VerificationFailed {
                    reason: err.user_message(),
                },
            )?;
            Err(err)
        }
    }
}

#[post("/session")]
pub fn start(
    cookies: &CookieJar<'_>,
    registry: &State<SessionRegistry>,
    config: &State<Config>,
) -> Json<SessionView> {
    let id = registry.start();
    cookies.add(SessionCookie::new(id).into_cookie(config));
    render(&Session::new(), registry)
}

#[get("/session")]
pub fn view(cookie: SessionCookie, registry: &State<SessionRegistry>) -> Result<Json<SessionView>> {
    let session = registry.get(cookie.id())?;
    Ok(render(&session, registry))
}

#[post("/session/token", data = "<request>", format = "json")]
pub async fn submit_token(
    cookie: SessionCookie,
    request: Json<TokenRequest>,
    registry: &State<SessionRegistry>,
    tokens: &State<Box<dyn TokenStore>>,
) -> Result<Json<SessionView>> {
    let id = cookie.id();
    // An empty token is rejected before the session moves.
    let token = request.token.parse::<VoteToken>().map_err(Error::bad_request)?;
    registry.apply(id, Event::SubmitToken(token.clone()))?;

    let result = verify_token(tokens.inner().as_ref(), &token)
        .await
        .map(|()| token);
    let session = settle_verification(registry, id, result)?;
    Ok(render(&session, registry))
}

#[post("/session/identity", data = "<request>", format = "json")]
pub async fn submit_identity(
    cookie: SessionCookie,
    request: Json<IdentityRequest>,
    config: &State<Config>,
    registry: &State<SessionRegistry>,
    tokens: &State<Box<dyn TokenStore>>,
    gateway: &State<Box<dyn VerificationGateway>>,
) -> Result<Json<SessionView>> {
    let id = cookie.id();
    let artifacts = request
        .into_inner()
        .into_artifacts(config.live_image_count())?;
    registry.apply(id, Event::SubmitIdentity(artifacts.clone()))?;

    let fresh = VoteToken::mint(OsRng, config.token_bytes());
    let result = verify_identity(
        gateway.inner().as_ref(),
        tokens.inner().as_ref(),
        &artifacts,
        fresh,
    )
    .await;
    let session = settle_verification(registry, id, result)?;
    Ok(render(&session, registry))
}

#[put("/session/selections", data = "<request>", format = "json")]
pub async fn select(
    cookie: SessionCookie,
    request: Json<SelectRequest>,
    registry: &State<SessionRegistry>,
    catalogue: &State<Box<dyn Catalogue>>,
) -> Result<Json<SessionView>> {
    let candidate = catalogue
        .candidate(&request.candidate)
        .await?
        .ok_or_else(|| Error::not_found(format!("No candidate with ID '{}'", request.candidate)))?;
    let session = registry.apply(cookie.id(), Event::Select(Choice::from(candidate)))?;
    Ok(render(&session, registry))
}

#[post("/session/proceed")]
pub fn proceed(
    cookie: SessionCookie,
    registry: &State<SessionRegistry>,
) -> Result<Json<SessionView>> {
    let session = registry.apply(cookie.id(), Event::Proceed)?;
    Ok(render(&session, registry))
}

#[post("/session/back")]
pub fn go_back(
    cookie: SessionCookie,
    registry: &State<SessionRegistry>,
) -> Result<Json<SessionView>> {
    let session = registry.apply(cookie.id(), Event::GoBack)?;
    Ok(render(&session, registry))
}

#[post("/session/commit")]
pub async fn commit_vote(
    cookie: SessionCookie,
    registry: &State<SessionRegistry>,
    tokens: &State<Box<dyn TokenStore>>,
) -> Result<Json<SessionView>> {
    let id = cookie.id();
    let session = registry.get(id)?;
    let event = commit(&session, tokens.inner().as_ref())
        .await?
        .into_event()?;
    let session = registry.apply(id, event)?;
    Ok(render(&session, registry))
}

#[post("/session/feedback/begin")]
pub fn begin_feedback(
    cookie: SessionCookie,
    registry: &State<SessionRegistry>,
) -> Result<Json<SessionView>> {
    let session = registry.apply(cookie.id(), Event::BeginFeedback)?;
    Ok(render(&session, registry))
}

#[post("/session/feedback/cancel")]
pub fn cancel_feedback(
    cookie: SessionCookie,
    registry: &State<SessionRegistry>,
) -> Result<Json<SessionView>> {
    let session = registry.apply(cookie.id(), Event::CancelFeedback)?;
    Ok(render(&session, registry))
}

#[post("/session/feedback", data = "<request>", format = "json")]
pub async fn submit_feedback(
    cookie: SessionCookie,
    request: Json<FeedbackRequest>,
    config: &State<Config>,
    registry: &State<SessionRegistry>,
    tokens: &State<Box<dyn TokenStore>>,
) -> Result<Json<SessionView>> {
    let id = cookie.id();
    let session = registry.get(id)?;
    let Session::Feedback { token, .. } = &session else {
        return Err(TransitionError::NotPermitted {
            stage: session.stage(),
            event: "submit feedback",
        }
        .into());
    };

    let feedback =
        Feedback::new(token, request.into_inner(), config).map_err(Error::bad_request)?;
    tokens.submit_feedback(&feedback).await?;

    let session = registry.apply(id, Event::End)?;
    Ok(render(&session, registry))
}

#[post("/session/end")]
pub fn end(cookie: SessionCookie, registry: &State<SessionRegistry>) -> Result<Json<SessionView>> {
    let session = registry.apply(cookie.id(), Event::End)?;
    Ok(render(&session, registry))
}

#[delete("/session")]
pub fn restart(
    cookie: SessionCookie,
    registry: &State<SessionRegistry>,
) -> Result<Json<SessionView>> {
    let session = registry.apply(cookie.id(), Event::Restart)?;
    Ok(render(&session, registry))
}
