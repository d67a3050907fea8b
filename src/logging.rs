use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use log::LevelFilter;
use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    Data, Orbit, Request, Response, Rocket,
};

use crate::model::session::cookie::SessionCookie;

/// Logger target that Rocket writes its own launch logs to.
const ROCKET_TARGET: &str = "rocket";

/// A unique identifier for a particular request, used to pair up the request
/// and response log lines.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// The ID of `req`, assigned on first use.
    pub fn of(req: &Request<'_>) -> Self {
        *req.local_cache(Self::next)
    }

    fn next() -> Self {
        static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stop Rocket's own logging once the server is up; the `LoggerFairing`
/// covers requests from then on.
pub fn silence_rocket() {
    log4rs_dynamic_filters::DynamicLevelFilter::set(ROCKET_TARGET, LevelFilter::Off);
}

/// A rocket fairing that logs every request and response, tagging responses
/// with the kiosk session they belong to.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let protocol = if rocket.config().tls_enabled() {
            "https"
        } else {
            "http"
        };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("Kiosk backend listening on {protocol}://{ip}:{port}");
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let id = RequestId::of(req);
        info!("->req{id} {} {}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = RequestId::of(req);
        let code = res.status();
        let route = match req.route() {
            Some(r) => match &r.name {
                Some(name) => format!("{name} ({})", r.uri),
                None => r.uri.to_string(),
            },
            None => "UNKNOWN ROUTE".to_string(),
        };
        let session = match req.guard::<SessionCookie>().await.succeeded() {
            Some(cookie) => format!(" [session {}]", cookie.id()),
            None => String::new(),
        };

        let log_msg = format!("<-rsp{id} {code} {route}{session}");
        match code.class() {
            StatusClass::ServerError => error!("{log_msg}"),
            StatusClass::ClientError => warn!("{log_msg}"),
            _ => info!("{log_msg}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, ending kiosk sessions...");
    }
}
