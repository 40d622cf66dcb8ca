use actix_web::web::*;

use crate::middleware::ThrottleGuard;

mod gate;
mod throttle;

#[derive(Clone)]
pub struct RouteGuards {
    pub ip_gate: ThrottleGuard,
    pub signup_gate: ThrottleGuard,
}

pub fn configure(cfg: &mut ServiceConfig, guards: RouteGuards) {
    cfg.service(
        scope("/api")
            .configure(|cfg| gate::configure(cfg, guards))
            .configure(throttle::configure),
    );
}
