use actix_web::web::*;

use crate::handlers::throttle;

pub fn configure(cfg: &mut ServiceConfig) {
    cfg.service(
        scope("/throttle/{namespace}")
            .service(
                resource("/attempts").route(get().to(throttle::get_attempts)),
            )
            .service(resource("/status").route(get().to(throttle::get_status)))
            .service(
                resource("/failures").route(post().to(throttle::record_failure)),
            )
            .service(resource("/resets").route(post().to(throttle::reset))),
    );
}
