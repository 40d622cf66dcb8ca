use actix_web::{HttpResponse, Responder};

/// Target of the reverse proxy's forward-auth subrequests. Rejections come from the throttle
/// guard wrapping the route, so reaching the handler means the request may proceed.
pub async fn allow() -> impl Responder {
    HttpResponse::NoContent()
}
