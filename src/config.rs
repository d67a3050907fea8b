use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::session::{RequiredCategories, SessionRegistry};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    // non-secrets
    required_categories: RequiredCategories,
    #[serde(default = "defaults::live_image_count")]
    live_image_count: usize,
    session_ttl: u32,
    #[serde(default = "defaults::feedback_timeout")]
    feedback_timeout: u32,
    #[serde(default = "defaults::token_bytes")]
    token_bytes: usize,
    // secrets
    jwt_secret: String,
    hmac_secret: String,
}

mod defaults {
    pub fn live_image_count() -> usize {
        5
    }

    pub fn feedback_timeout() -> u32 {
        120
    }

    pub fn token_bytes() -> usize {
        32
    }
}

impl Config {
    /// Categories every ballot must fill.
    pub fn required_categories(&self) -> &RequiredCategories {
        &self.required_categories
    }

    /// Exact number of live captures an identity check needs.
    pub fn live_image_count(&self) -> usize {
        self.live_image_count
    }

    /// Valid lifetime of the kiosk session cookie in seconds.
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl.into())
    }

    /// How long the receipt and feedback screens stay up before the session
    /// ends on its own.
    pub fn feedback_timeout(&self) -> Duration {
        Duration::seconds(self.feedback_timeout.into())
    }

    /// Bytes of entropy in a freshly issued voting token.
    pub fn token_bytes(&self) -> usize {
        self.token_bytes
    }

    /// Secret key used to encrypt JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key used to sign HMACs.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it, together with
/// the session registry built from it, in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!(
            "Ballot categories: {}",
            config
                .required_categories()
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        // Manage the state.
        let registry = SessionRegistry::new(&config);
        rocket = rocket.manage(config).manage(registry);
        Ok(rocket)
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self {
                required_categories: RequiredCategories::example(),
                live_image_count: 5,
                session_ttl: 3600,
                feedback_timeout: 120,
                token_bytes: 32,
                jwt_secret: "test jwt secret".to_string(),
                hmac_secret: "test hmac secret".to_string(),
            }
        }
    }
}
