use rocket::{http::Status, Catcher, Request, Route};

use crate::error::Error;

mod catalogue;
mod session;
mod voters;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(session::routes());
    routes.extend(catalogue::routes());
    routes.extend(voters::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![json_catcher]
}

/// Render failures that never reached a handler (missing session cookie,
/// malformed body, unknown route) in the same shape as handler errors.
#[catch(default)]
fn json_catcher(status: Status, _req: &Request) -> Error {
    Error::from_status(status)
}
