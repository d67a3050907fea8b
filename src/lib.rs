#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::ConfigFairing;
use crate::logging::LoggerFairing;
use crate::model::{gateway::GatewayFairing, store::StoreFairing};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;

/// Assemble the server. The config, session registry, store and gateway are
/// placed into managed state by their fairings during ignition.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(GatewayFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// A server backed by the given test doubles instead of the configured
/// store and gateway.
#[cfg(test)]
fn rocket_for_backends(
    store: model::store::MemoryStore,
    gateway: model::gateway::StubGateway,
) -> Rocket<Build> {
    use rocket::figment::providers::Serialized;

    use crate::model::gateway::VerificationGateway;

    let test_config = rocket::serde::json::json!({
        "required_categories": ["MNA", "MPA"],
        "session_ttl": 3600,
        "feedback_timeout": 120,
        "jwt_secret": "test jwt secret",
        "hmac_secret": "test hmac secret",
        "log_level": "off",
    });
    let figment = rocket::Config::figment().merge(Serialized::globals(test_config));

    let gateway: Box<dyn VerificationGateway> = Box::new(gateway);
    model::store::manage_store(rocket::custom(figment), store)
        .manage(gateway)
        .attach(ConfigFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}
