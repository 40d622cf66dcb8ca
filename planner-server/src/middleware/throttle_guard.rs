use planner_common::db::DaoError;
use planner_common::throttle::{IdentifierKind, IpThrottle, SpamPrevention};

use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::web;
use futures::future::LocalBoxFuture;
use serde::Deserialize;
use std::future::{ready, Ready};
use std::net::IpAddr;
use std::rc::Rc;

use crate::handlers::error::HttpErrorResponse;
use crate::middleware::client_addr::InboundAddrs;

#[derive(Clone)]
enum GuardKind {
    Ip(IpThrottle),
    Spam(SpamPrevention),
}

impl GuardKind {
    fn name(&self) -> &'static str {
        match self {
            GuardKind::Ip(_) => "ip-throttle",
            GuardKind::Spam(_) => "spam-prevention",
        }
    }

    /// The kind of identifier the request is blocked on, if any.
    fn blocked_on(
        &self,
        client_ip: Option<IpAddr>,
        email: Option<&str>,
    ) -> Result<Option<IdentifierKind>, DaoError> {
        match self {
            GuardKind::Ip(throttle) => match client_ip {
                Some(ip) if throttle.is_blocked(&ip.to_string())? => Ok(Some(IdentifierKind::Ip)),
                _ => Ok(None),
            },
            GuardKind::Spam(spam_prevention) => {
                if let Some(ip) = client_ip {
                    if spam_prevention.is_blocked(&ip.to_string(), IdentifierKind::Ip)? {
                        return Ok(Some(IdentifierKind::Ip));
                    }
                }

                match email {
                    Some(email) if spam_prevention.is_blocked(email, IdentifierKind::Email)? => {
                        Ok(Some(IdentifierKind::Email))
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}

/// Rejects requests from clients that are currently blocked with a 429. Requests whose client
/// address cannot be determined are let through.
#[derive(Clone)]
pub struct ThrottleGuard {
    kind: GuardKind,
}

impl ThrottleGuard {
    pub fn ip(throttle: IpThrottle) -> Self {
        Self {
            kind: GuardKind::Ip(throttle),
        }
    }

    /// Also checks the `email` field of a JSON request body, if there is one. The body is
    /// handed on to the wrapped service unchanged.
    pub fn spam(spam_prevention: SpamPrevention) -> Self {
        Self {
            kind: GuardKind::Spam(spam_prevention),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ThrottleGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = ThrottleGuardMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ThrottleGuardMiddleware {
            service: Rc::new(service),
            kind: self.kind.clone(),
        }))
    }
}

pub struct ThrottleGuardMiddleware<S> {
    service: Rc<S>,
    kind: GuardKind,
}

impl<S, B> Service<ServiceRequest> for ThrottleGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let kind = self.kind.clone();
        let client_ip = InboundAddrs::from_request(req.request()).client_ip();

        Box::pin(async move {
            let email = match kind {
                GuardKind::Spam(_) => take_email(&mut req).await?,
                GuardKind::Ip(_) => None,
            };

            let guard_name = kind.name();

            let blocked_on = web::block(move || kind.blocked_on(client_ip, email.as_deref()))
                .await
                .map_err(HttpErrorResponse::from)?;

            match blocked_on {
                Ok(None) => (),
                Ok(Some(identifier_kind)) => {
                    log::warn!(
                        "Blocked client at {} (guard={guard_name}, kind={identifier_kind})",
                        req.path(),
                    );
                    return Err(HttpErrorResponse::TooManyAttempts(String::from(
                        "Please try again later",
                    ))
                    .into());
                }
                Err(e) => {
                    log::error!("{e}");
                    return Err(HttpErrorResponse::InternalError(String::from(
                        "Failed to check throttle status",
                    ))
                    .into());
                }
            }

            service.call(req).await
        })
    }
}

#[derive(Deserialize)]
struct EmailField {
    email: Option<String>,
}

/// Buffers the request body to read its `email` field, then puts the body back for the
/// wrapped service.
async fn take_email(req: &mut ServiceRequest) -> Result<Option<String>, actix_web::Error> {
    let body = req.extract::<web::Bytes>().await?;

    let email = serde_json::from_slice::<EmailField>(&body)
        .ok()
        .and_then(|b| b.email)
        .filter(|e| !e.is_empty());

    let (_, mut payload) = actix_http::h1::Payload::create(true);
    payload.unread_data(body);
    req.set_payload(Payload::from(payload));

    Ok(email)
}
