//! The admin HTTP surface (§A.6), grounded in `raftcat`'s actix-web status
//! server — modernized from actix-web 0.7 to actix-web 4, and trimmed down
//! to the three endpoints an operator needs: liveness, readiness, and a
//! Prometheus scrape target.

use actix_web::{web, App, HttpResponse, HttpServer};
use prometheus::{Encoder, TextEncoder};

use crate::context::State;

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn readyz(state: web::Data<State>) -> HttpResponse {
    // The controllers themselves report readiness by virtue of running; the
    // one thing worth checking here is that metric collection hasn't
    // panicked the registry into an unusable state.
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    match encoder.encode(&state.registry().gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok().body("ready"),
        Err(e) => HttpResponse::InternalServerError().body(format!("metrics registry error: {e}")),
    }
}

async fn metrics(state: web::Data<State>) -> HttpResponse {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let families = state.registry().gather();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("failed to encode metrics: {e}"));
    }
    HttpResponse::Ok().content_type(encoder.format_type()).body(buffer)
}

pub async fn run(state: State, port: u16) -> std::io::Result<()> {
    tracing::info!(port, "admin server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/healthz", web::get().to(healthz))
            .route("/readyz", web::get().to(readyz))
            .route("/metrics", web::get().to(metrics))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
