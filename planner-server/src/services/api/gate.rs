use actix_web::web::*;

use crate::handlers::gate;

use super::RouteGuards;

pub fn configure(cfg: &mut ServiceConfig, guards: RouteGuards) {
    cfg.service(
        scope("/gate")
            .service(
                resource("/ip").route(post().to(gate::allow).wrap(guards.ip_gate)),
            )
            .service(
                resource("/signup").route(post().to(gate::allow).wrap(guards.signup_gate)),
            ),
    );
}
