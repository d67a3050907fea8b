use std::time::Duration;

use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    model::session::VoteToken,
};

use super::{IdentityArtifacts, ImageDetail, VerificationGateway, VerificationOutcome};

/// Configuration for the verification service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Base URL; requests go to `{gateway_url}/verify_identity`.
    gateway_url: String,
    /// Seconds to wait for a verdict.
    #[serde(default = "default_gateway_timeout")]
    gateway_timeout: u64,
}

fn default_gateway_timeout() -> u64 {
    30
}

/// Talks to the face-matching service over HTTP.
pub struct HttpGateway {
    client: Client,
    endpoint: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout))
            .build()?;
        let endpoint = format!("{}/verify_identity", config.gateway_url.trim_end_matches('/'));
        Ok(Self { client, endpoint })
    }

    fn form(artifacts: &IdentityArtifacts) -> Result<Form> {
        let cnic = image_part(&artifacts.cnic_image, "cnic.jpg")?;
        let mut form = Form::new().part("cnic_image", cnic);
        if let Some(qr_id) = &artifacts.qr_id {
            form = form.text("qr_id", qr_id.clone());
        }
        for (i, image) in artifacts.live_images.iter().enumerate() {
            form = form.part("live_images[]", image_part(image, &format!("live_{i}.jpg"))?);
        }
        Ok(form)
    }
}

fn image_part(bytes: &[u8], file_name: &str) -> Result<Part> {
    Ok(Part::bytes(bytes.to_vec())
        .file_name(file_name.to_string())
        .mime_str("image/jpeg")?)
}

#[rocket::async_trait]
impl VerificationGateway for HttpGateway {
    async fn verify_identity(&self, artifacts: &IdentityArtifacts) -> Result<VerificationOutcome> {
        debug!(
            "Requesting identity verification for {}",
            artifacts.qr_id.as_deref().unwrap_or("unidentified voter")
        );
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(Self::form(artifacts)?)
            .send()
            .await?;
        let status = response.status();
        let body = response.json::<GatewayResponse>().await.ok();
        interpret(status, body)
    }
}

/// Response body of the verification service. Every field is optional since
/// its error paths return different subsets.
#[derive(Debug, Default, Deserialize)]
struct GatewayResponse {
    verified: Option<bool>,
    token: Option<String>,
    reason: Option<String>,
    error: Option<String>,
    #[serde(default)]
    details: Vec<ImageDetail>,
}

const DEFAULT_REJECTION: &str = "Identity could not be verified.";

/// Turn an HTTP status and (possibly undecodable) body into a verdict.
fn interpret(status: StatusCode, body: Option<GatewayResponse>) -> Result<VerificationOutcome> {
    let Some(body) = body else {
        return Err(Error::Unavailable(format!(
            "verification service returned {status} with an unreadable body"
        )));
    };

    match body.verified {
        Some(true) => {
            let token = body.token.and_then(|token| token.parse::<VoteToken>().ok());
            Ok(VerificationOutcome::Verified { token })
        }
        Some(false) => Ok(rejected(body)),
        None if status.is_client_error() && (body.error.is_some() || body.reason.is_some()) => {
            Ok(rejected(body))
        }
        None => Err(Error::Unavailable(format!(
            "verification service returned {status} without a verdict"
        ))),
    }
}

fn rejected(body: GatewayResponse) -> VerificationOutcome {
    VerificationOutcome::Rejected {
        reason: body
            .reason
            .or(body.error)
            .unwrap_or_else(|| DEFAULT_REJECTION.to_string()),
        details: body.details,
    }
}

/// A fairing that loads the gateway config and places the gateway into
/// managed state.
pub struct GatewayFairing;

#[rocket::async_trait]
impl Fairing for GatewayFairing {
    fn info(&self) -> Info {
        Info {
            name: "Verification gateway",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<GatewayConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load verification gateway config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        // Construct the client.
        let gateway = match HttpGateway::new(&config) {
            Ok(gateway) => gateway,
            Err(e) => {
                error!("Failed to build verification gateway client: {e}");
                return Err(rocket);
            }
        };
        info!("Verification gateway at {}", gateway.endpoint);

        // Manage the state.
        let gateway: Box<dyn VerificationGateway> = Box::new(gateway);
        rocket = rocket.manage(gateway);
        Ok(rocket)
    }
}
