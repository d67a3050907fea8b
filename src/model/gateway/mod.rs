//! Identity verification against the external face-matching service.

use std::fmt::{Debug, Formatter};

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::session::VoteToken,
};

mod http;

pub use http::{GatewayConfig, GatewayFairing, HttpGateway};

/// Captured images for one verification attempt. Only lives as long as the
/// `Verifying` stage that holds it.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityArtifacts {
    pub qr_id: Option<String>,
    pub cnic_image: Vec<u8>,
    pub live_images: Vec<Vec<u8>>,
}

impl Debug for IdentityArtifacts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityArtifacts")
            .field("qr_id", &self.qr_id)
            .field("cnic_image", &format_args!("{} bytes", self.cnic_image.len()))
            .field("live_images", &self.live_images.len())
            .finish()
    }
}

/// Identity capture as sent by the kiosk, images base64 encoded.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct IdentityRequest {
    pub qr_id: Option<String>,
    pub cnic_image: String,
    pub live_images: Vec<String>,
}

impl IdentityRequest {
    /// Decode the images, requiring exactly `live_image_count` live captures.
    pub fn into_artifacts(self, live_image_count: usize) -> Result<IdentityArtifacts> {
        if self.live_images.len() != live_image_count {
            return Err(Error::bad_request(format!(
                "Exactly {live_image_count} live images are required, got {}",
                self.live_images.len()
            )));
        }
        let qr_id = self
            .qr_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        let cnic_image = decode_image(&self.cnic_image)
            .ok_or_else(|| Error::bad_request("CNIC image is missing or not valid base64"))?;
        let live_images = self
            .live_images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                decode_image(image).ok_or_else(|| {
                    Error::bad_request(format!("Live image {} is not valid base64", i + 1))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IdentityArtifacts {
            qr_id,
            cnic_image,
            live_images,
        })
    }
}

/// Decode a base64 image, accepting a `data:` URL prefix as produced by
/// browser canvases.
fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    let encoded = match encoded.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    BASE64
        .decode(encoded.trim().as_bytes())
        .ok()
        .filter(|bytes| !bytes.is_empty())
}

/// Per-image result reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetail {
    pub image: u32,
    pub success: bool,
    pub reason: Option<String>,
}

/// A definite answer from the gateway. Transport trouble is an `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified {
        /// Token minted by the gateway, if it mints them.
        token: Option<VoteToken>,
    },
    Rejected {
        reason: String,
        details: Vec<ImageDetail>,
    },
}

#[rocket::async_trait]
pub trait VerificationGateway: Send + Sync {
    async fn verify_identity(&self, artifacts: &IdentityArtifacts) -> Result<VerificationOutcome>;
}

#[cfg(test)]
pub use stub::StubGateway;


/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl IdentityArtifacts {
        pub fn example() -> Self {
            Self {
                qr_id: Some("QR-1001".to_string()),
                cnic_image: b"cnic".to_vec(),
                live_images: vec![b"face".to_vec(); 5],
            }
        }
    }

    impl IdentityRequest {
        pub fn example() -> Self {
            Self::example_with(5)
        }

        pub fn example_with(live_images: usize) -> Self {
            let face = format!("data:image/jpeg;base64,{}", BASE64.encode(b"face"));
            Self {
                qr_id: Some("QR-1001".to_string()),
                cnic_image: BASE64.encode(b"cnic"),
                live_images: vec![face; live_images],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_decodes_into_artifacts() {
        let artifacts = IdentityRequest::example().into_artifacts(5).unwrap();
        assert_eq!(artifacts, IdentityArtifacts::example());
    }

    #[test]
    fn live_image_count_must_match() {
        for count in [0, 4, 6] {
            let err = IdentityRequest::example_with(count)
                .into_artifacts(5)
                .unwrap_err();
            assert!(matches!(err, Error::BadRequest(_)));
        }
    }

    #[test]
    fn bad_base64_rejected() {
        let mut request = IdentityRequest::example();
        request.live_images[2] = "not base64!".to_string();
        assert!(request.into_artifacts(5).is_err());

        let mut request = IdentityRequest::example();
        request.cnic_image = String::new();
        assert!(request.into_artifacts(5).is_err());
    }

    #[test]
    fn blank_qr_id_dropped() {
        let mut request = IdentityRequest::example();
        request.qr_id = Some("  ".to_string());
        assert_eq!(request.into_artifacts(5).unwrap().qr_id, None);
    }
}
