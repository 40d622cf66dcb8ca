use planner_common::request_io::{
    InputIdentifier, OutputAttemptCount, OutputBlockStatus, OutputThrottleRecord,
};
use planner_common::throttle::{
    BlockStatus, IdentifierKind, IpThrottle, SpamPrevention, Throttle, ThrottleNamespace,
};

use actix_web::{web, HttpRequest, HttpResponse};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::handlers::error::HttpErrorResponse;
use crate::handlers::is_key_correct;

const MAX_IDENTIFIER_LEN: usize = 255;

pub const API_KEY_HEADER: &str = "ThrottleApiKey";

/// Key that must be sent in the `ThrottleApiKey` header to record failures or reset attempts.
pub struct ThrottleApiKey(pub String);

pub async fn get_attempts(
    ip_throttle: web::Data<IpThrottle>,
    spam_prevention: web::Data<SpamPrevention>,
    namespace: web::Path<String>,
    input: web::Query<InputIdentifier>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let input = input.into_inner();
    let (throttle, kind) = select_throttle(&namespace, &input, &ip_throttle, &spam_prevention)?;

    let identifier = input.identifier;
    let identifier_ref = identifier.clone();

    let attempts =
        match web::block(move || throttle.get_attempt_count(&identifier_ref, kind)).await? {
            Ok(a) => a,
            Err(e) => {
                log::error!("{e}");
                return Err(HttpErrorResponse::InternalError(String::from(
                    "Failed to get attempt count",
                )));
            }
        };

    Ok(HttpResponse::Ok().json(OutputAttemptCount {
        identifier,
        kind: kind.map(|k| String::from(k.as_str())),
        attempts,
    }))
}

pub async fn get_status(
    ip_throttle: web::Data<IpThrottle>,
    spam_prevention: web::Data<SpamPrevention>,
    namespace: web::Path<String>,
    input: web::Query<InputIdentifier>,
) -> Result<HttpResponse, HttpErrorResponse> {
    let input = input.into_inner();
    let (throttle, kind) = select_throttle(&namespace, &input, &ip_throttle, &spam_prevention)?;

    let identifier = input.identifier;

    let status = match web::block(move || throttle.check(&identifier, kind)).await? {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to check block status",
            )));
        }
    };

    let resp_body = match status {
        BlockStatus::Clear => OutputBlockStatus {
            blocked: false,
            blocked_until: None,
        },
        BlockStatus::Blocked { until } => OutputBlockStatus {
            blocked: true,
            blocked_until: until.map(unix_secs),
        },
    };

    Ok(HttpResponse::Ok().json(resp_body))
}

pub async fn record_failure(
    req: HttpRequest,
    api_key: web::Data<ThrottleApiKey>,
    ip_throttle: web::Data<IpThrottle>,
    spam_prevention: web::Data<SpamPrevention>,
    namespace: web::Path<String>,
    input: web::Json<InputIdentifier>,
) -> Result<HttpResponse, HttpErrorResponse> {
    verify_api_key(&req, &api_key)?;

    let input = input.into_inner();
    let (throttle, kind) = select_throttle(&namespace, &input, &ip_throttle, &spam_prevention)?;

    let identifier = input.identifier;

    let record = match web::block(move || throttle.record_failed_attempt(&identifier, kind)).await?
    {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to record failed attempt",
            )));
        }
    };

    Ok(HttpResponse::Ok().json(OutputThrottleRecord {
        kind: record.kind().map(|k| String::from(k.as_str())),
        identifier: record.identifier,
        attempts: record.attempts,
        blocked: record.blocked,
        blocked_until: record.blocked_until.map(unix_secs),
    }))
}

pub async fn reset(
    req: HttpRequest,
    api_key: web::Data<ThrottleApiKey>,
    ip_throttle: web::Data<IpThrottle>,
    spam_prevention: web::Data<SpamPrevention>,
    namespace: web::Path<String>,
    input: web::Json<InputIdentifier>,
) -> Result<HttpResponse, HttpErrorResponse> {
    verify_api_key(&req, &api_key)?;

    let input = input.into_inner();
    let (throttle, kind) = select_throttle(&namespace, &input, &ip_throttle, &spam_prevention)?;

    let identifier = input.identifier;

    match web::block(move || throttle.reset_attempts(&identifier, kind)).await? {
        Ok(_) => (),
        Err(e) => {
            log::error!("{e}");
            return Err(HttpErrorResponse::InternalError(String::from(
                "Failed to reset attempts",
            )));
        }
    }

    Ok(HttpResponse::NoContent().finish())
}

fn verify_api_key(req: &HttpRequest, api_key: &ThrottleApiKey) -> Result<(), HttpErrorResponse> {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    if !is_key_correct(key, &api_key.0) {
        return Err(HttpErrorResponse::IncorrectCredential(format!(
            "Missing or incorrect {API_KEY_HEADER} header"
        )));
    }

    Ok(())
}

fn select_throttle(
    namespace: &str,
    input: &InputIdentifier,
    ip_throttle: &IpThrottle,
    spam_prevention: &SpamPrevention,
) -> Result<(Throttle, Option<IdentifierKind>), HttpErrorResponse> {
    if input.identifier.is_empty() {
        return Err(HttpErrorResponse::IncorrectlyFormed(String::from(
            "Identifier must not be empty",
        )));
    }

    if input.identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(HttpErrorResponse::IncorrectlyFormed(format!(
            "Identifier is too long. Max: {MAX_IDENTIFIER_LEN} bytes"
        )));
    }

    let namespace = namespace
        .parse::<ThrottleNamespace>()
        .map_err(|e| HttpErrorResponse::IncorrectlyFormed(e.to_string()))?;

    match namespace {
        ThrottleNamespace::IpThrottle => {
            if input.kind.is_some() {
                return Err(HttpErrorResponse::IncorrectlyFormed(String::from(
                    "The ip-throttle namespace does not take an identifier kind",
                )));
            }

            Ok((ip_throttle.throttle().clone(), None))
        }
        ThrottleNamespace::SpamPrevention => {
            let Some(kind) = input.kind.as_deref() else {
                return Err(HttpErrorResponse::IncorrectlyFormed(String::from(
                    "The spam-prevention namespace requires an identifier kind",
                )));
            };

            let kind = kind
                .parse::<IdentifierKind>()
                .map_err(|e| HttpErrorResponse::IncorrectlyFormed(e.to_string()))?;

            Ok((spam_prevention.throttle().clone(), Some(kind)))
        }
    }
}

#[inline]
fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    use planner_common::throttle::memory::InMemoryStore;
    use planner_common::throttle::ThrottleKey;

    use actix_web::body::to_bytes;
    use actix_web::dev::{Service, ServiceResponse};
    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use actix_web::web::Data;
    use actix_web::App;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const API_KEY: &str = "d2f0c5e3b8a94c17";

    async fn test_app(
        store: Arc<InMemoryStore>,
    ) -> impl Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error>
    {
        test::init_service(
            App::new()
                .app_data(Data::new(ThrottleApiKey(String::from(API_KEY))))
                .app_data(Data::new(IpThrottle::with_defaults(store.clone())))
                .app_data(Data::new(SpamPrevention::with_defaults(store)))
                .service(
                    web::scope("/api/throttle/{namespace}")
                        .route("/attempts", web::get().to(get_attempts))
                        .route("/status", web::get().to(get_status))
                        .route("/failures", web::post().to(record_failure))
                        .route("/resets", web::post().to(reset)),
                ),
        )
        .await
    }

    async fn post_failure(
        app: &impl Service<
            actix_http::Request,
            Response = ServiceResponse,
            Error = actix_web::Error,
        >,
        namespace: &str,
        body: serde_json::Value,
    ) -> ServiceResponse {
        let req = TestRequest::post()
            .uri(&format!("/api/throttle/{namespace}/failures"))
            .insert_header((API_KEY_HEADER, API_KEY))
            .set_json(body)
            .to_request();
        test::call_service(app, req).await
    }

    async fn body_json(resp: ServiceResponse) -> serde_json::Value {
        let body = to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[actix_web::test]
    async fn test_failures_block_ip() {
        let store = Arc::new(InMemoryStore::new());
        let app = test_app(store.clone()).await;

        for expected in 1..5 {
            let resp = post_failure(&app, "ip-throttle", json!({ "identifier": "1.2.3.4" })).await;
            assert_eq!(resp.status(), StatusCode::OK);

            let record = body_json(resp).await;
            assert_eq!(record["attempts"], expected);
            assert_eq!(record["blocked"], false);
            assert!(record["kind"].is_null());
        }

        let resp = post_failure(&app, "ip-throttle", json!({ "identifier": "1.2.3.4" })).await;
        let record = body_json(resp).await;
        assert_eq!(record["attempts"], 5);
        assert_eq!(record["blocked"], true);
        assert!(record["blocked_until"].as_u64().is_some());

        let req = TestRequest::get()
            .uri("/api/throttle/ip-throttle/status?identifier=1.2.3.4")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let status = body_json(resp).await;
        assert_eq!(status["blocked"], true);

        let blocked_until = status["blocked_until"].as_u64().unwrap();
        let expected = unix_secs(SystemTime::now() + Duration::from_secs(15 * 60));
        assert!(blocked_until <= expected);
        assert!(blocked_until + 60 > expected);
    }

    #[actix_web::test]
    async fn test_reset_clears_attempts() {
        let store = Arc::new(InMemoryStore::new());
        let app = test_app(store.clone()).await;

        for _ in 0..3 {
            post_failure(
                &app,
                "spam-prevention",
                json!({ "identifier": "a@b.com", "kind": "email" }),
            )
            .await;
        }

        let req = TestRequest::get()
            .uri("/api/throttle/spam-prevention/attempts?identifier=a@b.com&kind=email")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let count = body_json(resp).await;
        assert_eq!(count["attempts"], 3);
        assert_eq!(count["kind"], "email");
        assert_eq!(count["identifier"], "a@b.com");

        let req = TestRequest::post()
            .uri("/api/throttle/spam-prevention/resets")
            .insert_header((API_KEY_HEADER, API_KEY))
            .set_json(json!({ "identifier": "a@b.com", "kind": "email" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = TestRequest::get()
            .uri("/api/throttle/spam-prevention/attempts?identifier=a@b.com&kind=email")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(body_json(resp).await["attempts"], 0);
    }

    #[actix_web::test]
    async fn test_unknown_identifier_reads_create_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let app = test_app(store.clone()).await;

        let req = TestRequest::get()
            .uri("/api/throttle/spam-prevention/status?identifier=nobody&kind=user")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let status = body_json(resp).await;
        assert_eq!(status["blocked"], false);
        assert!(status["blocked_until"].is_null());

        let req = TestRequest::get()
            .uri("/api/throttle/ip-throttle/attempts?identifier=9.9.9.9")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(body_json(resp).await["attempts"], 0);

        assert!(store.is_empty());
    }

    #[actix_web::test]
    async fn test_rejects_malformed_input() {
        let store = Arc::new(InMemoryStore::new());
        let app = test_app(store.clone()).await;

        let bad_requests = [
            ("login-throttle", json!({ "identifier": "1.2.3.4" })),
            ("ip-throttle", json!({ "identifier": "1.2.3.4", "kind": "ip" })),
            ("spam-prevention", json!({ "identifier": "a@b.com" })),
            ("spam-prevention", json!({ "identifier": "a@b.com", "kind": "phone" })),
            ("ip-throttle", json!({ "identifier": "" })),
            ("ip-throttle", json!({ "identifier": "x".repeat(256) })),
        ];

        for (namespace, body) in bad_requests {
            let resp = post_failure(&app, namespace, body).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(resp).await["err_type"], "incorrectly_formed");
        }

        let resp =
            post_failure(&app, "ip-throttle", json!({ "identifier": "x".repeat(255) })).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(store.len(), 1);
    }

    #[actix_web::test]
    async fn test_updates_require_api_key() {
        let store = Arc::new(InMemoryStore::new());
        let app = test_app(store.clone()).await;

        for _ in 0..5 {
            post_failure(&app, "ip-throttle", json!({ "identifier": "1.2.3.4" })).await;
        }

        for path in ["failures", "resets"] {
            let req = TestRequest::post()
                .uri(&format!("/api/throttle/ip-throttle/{path}"))
                .set_json(json!({ "identifier": "1.2.3.4" }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(resp).await["err_type"], "incorrect_credential");

            let req = TestRequest::post()
                .uri(&format!("/api/throttle/ip-throttle/{path}"))
                .insert_header((API_KEY_HEADER, "d2f0c5e3b8a94c18"))
                .set_json(json!({ "identifier": "1.2.3.4" }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }

        let key = ThrottleKey::new(ThrottleNamespace::IpThrottle, None, "1.2.3.4");
        let record = store.get(&key).unwrap();
        assert_eq!(record.attempts, 5);
        assert!(record.blocked);

        // Reads stay open
        let req = TestRequest::get()
            .uri("/api/throttle/ip-throttle/status?identifier=1.2.3.4")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["blocked"], true);
    }
}
