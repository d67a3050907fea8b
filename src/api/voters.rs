use rand::rngs::OsRng;
use rocket::{serde::json::Json, Route, State};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        catalogue::VoterInfo,
        session::VoteToken,
        store::{Catalogue, IssuedToken, TokenStore},
    },
};

pub fn routes() -> Vec<Route> {
    routes![voter_info, issue_token]
}

#[get("/voters/<qr_id>")]
async fn voter_info(
    qr_id: &str,
    catalogue: &State<Box<dyn Catalogue>>,
) -> Result<Json<VoterInfo>> {
    let voter = catalogue
        .voter(qr_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("No registered voter with ID {qr_id}")))?;
    Ok(Json(voter.into()))
}

/// Hand a registered voter their voting token, reusing one they have not
/// spent yet.
#[post("/voters/<qr_id>/token")]
async fn issue_token(
    qr_id: &str,
    config: &State<Config>,
    tokens: &State<Box<dyn TokenStore>>,
) -> Result<Json<IssuedToken>> {
    let fresh = VoteToken::mint(OsRng, config.token_bytes());
    let issued = tokens.issue_token(qr_id, fresh).await?;
    if issued.reused {
        info!("Re-issued existing token to voter {qr_id}");
    } else {
        info!("Issued new token to voter {qr_id}");
    }
    Ok(Json(issued))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client, serde::json::Value};

    use crate::model::store::MemoryStore;

    use super::*;

    #[backend_test]
    async fn voter_info_never_shows_token(client: Client) {
        let response = client.get(uri!(voter_info("QR-2002"))).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let body = response.into_string().await.unwrap();
        assert!(body.contains("Kamran Ali"));
        assert!(!body.contains("USED99"));

        let response = client.get(uri!(voter_info("QR-0000"))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn token_issued_once_then_reused(client: Client, store: MemoryStore) {
        let response = client.post(uri!(issue_token("QR-1001"))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let first = response.into_json::<Value>().await.unwrap();
        assert_eq!(first["reused"], false);

        // 32 bytes of entropy, unpadded base64url.
        let token = first["token"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 43);
        assert!(!token.contains(['+', '/', '=']));

        let response = client.post(uri!(issue_token("QR-1001"))).dispatch().await;
        let second = response.into_json::<Value>().await.unwrap();
        assert_eq!(second["reused"], true);
        assert_eq!(second["token"], token.as_str());

        let voter = store.registered_voter("QR-1001").unwrap();
        assert_eq!(voter.token.unwrap().as_str(), token);
        assert!(voter.verified_at.is_some());
    }

    #[backend_test]
    async fn voted_or_unknown_voters_get_nothing(client: Client) {
        let response = client.post(uri!(issue_token("QR-2002"))).dispatch().await;
        assert_eq!(Status::Conflict, response.status());

        let response = client.post(uri!(issue_token("QR-0000"))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}
