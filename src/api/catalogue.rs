use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    catalogue::{Candidate, CandidateId, Party, PartyId},
    session::Category,
    store::Catalogue,
};

pub fn routes() -> Vec<Route> {
    routes![parties, party_candidates, candidate]
}

#[get("/parties")]
async fn parties(catalogue: &State<Box<dyn Catalogue>>) -> Result<Json<Vec<Party>>> {
    Ok(Json(catalogue.parties().await?))
}

#[get("/parties/<party_id>/candidates?<category>")]
async fn party_candidates(
    party_id: PartyId,
    category: Option<String>,
    catalogue: &State<Box<dyn Catalogue>>,
) -> Result<Json<Vec<Candidate>>> {
    let category = category
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .map(Category::new);
    let candidates = catalogue
        .candidates(&party_id, category.as_ref())
        .await?;
    Ok(Json(candidates))
}

#[get("/candidates/<candidate_id>")]
async fn candidate(
    candidate_id: CandidateId,
    catalogue: &State<Box<dyn Catalogue>>,
) -> Result<Json<Candidate>> {
    let candidate = catalogue
        .candidate(&candidate_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("No candidate with ID '{candidate_id}'")))?;
    Ok(Json(candidate))
}
