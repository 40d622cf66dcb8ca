use actix_web::{web, HttpResponse, Responder};
use planner_common::db::DbThreadPool;
use serde::Deserialize;
use serde_json::json;

use crate::handlers::is_key_correct;

#[derive(Deserialize)]
pub struct HealthKeyQuery {
    pub key: Option<String>,
}

/// Key that must accompany requests to `/health`.
pub struct HealthEndpointKey(pub String);

pub async fn heartbeat() -> impl Responder {
    HttpResponse::Ok()
}

pub async fn health(
    db_thread_pool: Option<web::Data<DbThreadPool>>,
    health_key: web::Data<HealthEndpointKey>,
    query: web::Query<HealthKeyQuery>,
) -> impl Responder {
    if !is_key_correct(query.key.as_deref(), &health_key.0) {
        return HttpResponse::Unauthorized().finish();
    }

    let pool_state = db_thread_pool.map(|pool| {
        let state = pool.state();
        json!({
            "connections": state.connections,
            "idle_connections": state.idle_connections,
        })
    });

    HttpResponse::Ok().json(json!({ "db_thread_pool_state": pool_state }))
}
