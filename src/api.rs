use actix_web::{error, web, HttpRequest, HttpResponse, Responder};
use serde::Serialize;
use serde_json::json;

use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::model::{SignalRequest, SignalResponse};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    clients: usize,
}

fn presented_key(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
}

pub async fn health_check(dispatcher: web::Data<Dispatcher>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: dispatcher.registry().count(),
    })
}

pub async fn send_signal(
    req: HttpRequest,
    body: web::Json<SignalRequest>,
    dispatcher: web::Data<Dispatcher>,
) -> Result<HttpResponse, RelayError> {
    let report = dispatcher
        .dispatch(presented_key(&req), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(SignalResponse::from(&report)))
}

pub async fn list_subscribers(
    req: HttpRequest,
    dispatcher: web::Data<Dispatcher>,
) -> Result<HttpResponse, RelayError> {
    dispatcher.gate().check_control_plane(presented_key(&req))?;
    let subscribers = dispatcher.registry().subscribers();
    Ok(HttpResponse::Ok().json(json!({
        "clients": subscribers.len(),
        "subscribers": subscribers,
    })))
}

fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let detail = err.to_string();
    error::InternalError::from_response(
        err,
        HttpResponse::BadRequest().json(json!({
            "error": "bad_request",
            "detail": detail,
        })),
    )
    .into()
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/send_signal").route(web::post().to(send_signal)))
        .service(web::resource("/subscribers").route(web::get().to(list_subscribers)));
}
