//! Turning a typed token or a set of captured images into a verified voting
//! token.

use crate::{
    error::{Error, Result},
    model::{
        gateway::{IdentityArtifacts, ImageDetail, VerificationGateway, VerificationOutcome},
        store::TokenStore,
    },
};

use super::VoteToken;

pub const UNKNOWN_TOKEN: &str = "No such token exists. Please enter a valid token.";
pub const USED_TOKEN: &str = "This token has already been used for voting.";
const NO_TOKEN_ISSUED: &str = "Your identity was verified, but no voting token could be issued.";

/// Check a token typed at the kiosk.
pub async fn verify_token(store: &dyn TokenStore, token: &VoteToken) -> Result<()> {
    let status = store.check_token(token).await?;
    if !status.exists {
        return Err(Error::Verification(UNKNOWN_TOKEN.to_string()));
    }
    if status.used {
        return Err(Error::Conflict(USED_TOKEN.to_string()));
    }
    Ok(())
}

/// Verify a voter by face match and obtain their voting token.
///
/// A token minted by the gateway is adopted if unknown and refused if used.
/// Otherwise the store issues one for the voter's QR ID, preferring an
/// unused token they already hold over `fresh`.
pub async fn verify_identity(
    gateway: &dyn VerificationGateway,
    store: &dyn TokenStore,
    artifacts: &IdentityArtifacts,
    fresh: VoteToken,
) -> Result<VoteToken> {
    let token = match gateway.verify_identity(artifacts).await? {
        VerificationOutcome::Rejected { reason, details } => {
            return Err(Error::Verification(describe_rejection(&reason, &details)));
        }
        VerificationOutcome::Verified { token: Some(token) } => {
            let status = store.check_token(&token).await?;
            if status.used {
                return Err(Error::Conflict(USED_TOKEN.to_string()));
            }
            if !status.exists {
                store
                    .register_token(&token, artifacts.qr_id.as_deref())
                    .await?;
            }
            token
        }
        VerificationOutcome::Verified { token: None } => {
            let Some(qr_id) = artifacts.qr_id.as_deref() else {
                return Err(Error::Verification(NO_TOKEN_ISSUED.to_string()));
            };
            match store.issue_token(qr_id, fresh).await {
                Ok(issued) => {
                    if issued.reused {
                        debug!("Voter {qr_id} already held an unused token");
                    }
                    issued.token
                }
                Err(Error::NotFound(msg)) => return Err(Error::Verification(msg)),
                Err(e) => return Err(e),
            }
        }
    };
    Ok(token)
}

/// The gateway's reason, followed by any per-image failures.
fn describe_rejection(reason: &str, details: &[ImageDetail]) -> String {
    let mut message = reason.to_string();
    for detail in details.iter().filter(|d| !d.success) {
        if let Some(why) = &detail.reason {
            message.push_str(&format!(" Image {}: {why}.", detail.image));
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::model::{gateway::StubGateway, store::MemoryStore};

    #[rocket::async_test]
    async fn typed_tokens() {
        let store = MemoryStore::example();

        assert!(verify_token(&store, &VoteToken::example()).await.is_ok());

        let err = verify_token(&store, &VoteToken::example_unknown())
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::Verification(msg) if msg == UNKNOWN_TOKEN));

        let err = verify_token(&store, &VoteToken::example_used())
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::Conflict(msg) if msg == USED_TOKEN));
    }

    #[rocket::async_test]
    async fn identity_issues_store_token() {
        let store = MemoryStore::example();
        let gateway = StubGateway::accepting();
        let fresh = VoteToken::mint(OsRng, 32);

        let token = verify_identity(&gateway, &store, &IdentityArtifacts::example(), fresh.clone())
            .await
            .unwrap();
        assert_eq!(token, fresh);
        assert_eq!(
            store.registered_voter("QR-1001").unwrap().token,
            Some(fresh.clone())
        );

        // Verifying again carries the same unused token forward.
        let again = verify_identity(
            &gateway,
            &store,
            &IdentityArtifacts::example(),
            VoteToken::mint(OsRng, 32),
        )
        .await
        .unwrap();
        assert_eq!(again, fresh);
        assert_eq!(gateway.calls(), 2);
    }

    #[rocket::async_test]
    async fn gateway_token_is_adopted_or_refused() {
        let store = MemoryStore::example();
        let minted: VoteToken = "9f86d081884c7d65".parse().unwrap();
        let gateway = StubGateway::minting(minted.clone());

        let token = verify_identity(
            &gateway,
            &store,
            &IdentityArtifacts::example(),
            VoteToken::mint(OsRng, 32),
        )
        .await
        .unwrap();
        assert_eq!(token, minted);
        assert!(store.token_record(&minted).is_some());

        let gateway = StubGateway::minting(VoteToken::example_used());
        let err = verify_identity(
            &gateway,
            &store,
            &IdentityArtifacts::example(),
            VoteToken::mint(OsRng, 32),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[rocket::async_test]
    async fn rejection_and_outage() {
        let store = MemoryStore::example();

        let gateway = StubGateway::rejecting("Face verification failed.");
        let err = verify_identity(
            &gateway,
            &store,
            &IdentityArtifacts::example(),
            VoteToken::mint(OsRng, 32),
        )
        .await
        .unwrap_err();
        assert!(matches!(&err, Error::Verification(msg) if msg == "Face verification failed."));

        let gateway = StubGateway::unavailable();
        let err = verify_identity(
            &gateway,
            &store,
            &IdentityArtifacts::example(),
            VoteToken::mint(OsRng, 32),
        )
        .await
        .unwrap_err();
        assert!(err.retryable());
        assert_eq!(store.registered_voter("QR-1001").unwrap().token, None);
    }

    #[rocket::async_test]
    async fn verified_without_any_token_source_fails() {
        let store = MemoryStore::example();
        let gateway = StubGateway::accepting();
        let mut artifacts = IdentityArtifacts::example();
        artifacts.qr_id = None;

        let err = verify_identity(&gateway, &store, &artifacts, VoteToken::mint(OsRng, 32))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verification(_)));

        artifacts.qr_id = Some("QR-9999".to_string());
        let err = verify_identity(&gateway, &store, &artifacts, VoteToken::mint(OsRng, 32))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verification(_)));

        // A voter who has voted cannot get another token.
        artifacts.qr_id = Some("QR-2002".to_string());
        let err = verify_identity(&gateway, &store, &artifacts, VoteToken::mint(OsRng, 32))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn rejection_lists_failed_images() {
        let details = vec![
            ImageDetail {
                image: 1,
                success: true,
                reason: None,
            },
            ImageDetail {
                image: 3,
                success: false,
                reason: Some("No face detected".to_string()),
            },
        ];
        assert_eq!(
            describe_rejection("Face detection failed.", &details),
            "Face detection failed. Image 3: No face detected."
        );
    }
}
