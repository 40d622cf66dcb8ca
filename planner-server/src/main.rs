use planner_common::db::{self, DbThreadPool};
use planner_common::throttle::memory::InMemoryStore;
use planner_common::throttle::{IpThrottle, SpamPrevention, ThrottleStore};

use actix_web::web::Data;
use actix_web::{App, HttpServer};
use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, LogSpecification, Logger, Naming, WriteMode,
};
use std::sync::Arc;

use crate::env::ThrottleStoreBackend;
use crate::handlers::health::HealthEndpointKey;
use crate::handlers::throttle::ThrottleApiKey;
use crate::middleware::ThrottleGuard;
use crate::services::api::RouteGuards;

mod env;
mod handlers;
mod middleware;
mod pruning;
mod services;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let mut port = 9000u16;

    let mut args = std::env::args();

    // Eat the first argument, which is the relative path to the executable
    args.next();

    while let Some(arg) = args.next() {
        match arg.to_lowercase().as_str() {
            "--port" => {
                let port_str = {
                    let next_arg = args.next();

                    match next_arg {
                        Some(s) => s,
                        None => {
                            eprintln!("ERROR: --port option specified but no port was given");
                            std::process::exit(1);
                        }
                    }
                };

                port = {
                    let port_result = port_str.parse::<u16>();

                    match port_result {
                        Ok(p) => p,
                        Err(_) => {
                            eprintln!("ERROR: Incorrect format for port. Integer expected");
                            std::process::exit(1);
                        }
                    }
                };

                continue;
            }
            a => {
                eprintln!("ERROR: Invalid argument: {}", &a);
                std::process::exit(1);
            }
        }
    }

    let base_addr = format!("127.0.0.1:{}", &port);

    let log_spec = match LogSpecification::parse(&env::CONF.log_level) {
        Ok(s) => s,
        Err(_) => {
            eprintln!("ERROR: Invalid log level: {}", env::CONF.log_level);
            std::process::exit(1);
        }
    };

    let _logger = Logger::with(log_spec)
        .log_to_file(FileSpec::default().directory("./logs"))
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Timestamps,
            Cleanup::KeepLogAndCompressedFiles(60, 365),
        )
        .cleanup_in_background_thread(true)
        .duplicate_to_stdout(Duplicate::All)
        .write_mode(WriteMode::Async)
        .format(|writer, now, record| {
            write!(
                writer,
                "{:5} | {} | {}:{} | {}",
                record.level(),
                now.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
                record.module_path().unwrap_or("<unknown>"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .use_utc()
        .start()
        .expect("Failed to start logger");

    let actix_workers = env::CONF.actix_worker_count;

    let (throttle_store, db_thread_pool): (Arc<dyn ThrottleStore>, Option<DbThreadPool>) =
        match (env::CONF.throttle_store, env::CONF.db.as_ref()) {
            (ThrottleStoreBackend::Postgres, Some(db_conf)) => {
                log::info!("Connecting to database...");

                // To prevent resource starvation, max connections must be at least as large as
                // the number of actix workers
                let db_max_connections = db_conf.db_max_connections.max(actix_workers as u32);

                let db_thread_pool = match db::create_db_thread_pool(
                    &db_conf.database_uri(),
                    db_max_connections,
                    db_conf.db_idle_timeout,
                ) {
                    Ok(p) => p,
                    Err(_) => {
                        eprintln!("ERROR: Failed to connect to database");
                        std::process::exit(1);
                    }
                };

                log::info!("Successfully connected to database");

                (
                    Arc::new(db::throttle::Dao::new(&db_thread_pool)),
                    Some(db_thread_pool),
                )
            }
            _ => {
                log::warn!(
                    "Throttle records are kept in memory. They will not survive a restart and are \
                     not shared between server instances."
                );

                let store = Arc::new(InMemoryStore::new());

                pruning::spawn_stale_record_pruning(
                    Arc::clone(&store),
                    env::CONF.memory_store_retention,
                    env::CONF.memory_store_prune_frequency,
                );

                (store, None)
            }
        };

    let ip_throttle = IpThrottle::new(
        Arc::clone(&throttle_store),
        env::CONF.ip_throttle_max_attempts,
        env::CONF.ip_throttle_block_duration,
    );

    let spam_prevention = SpamPrevention::new(
        throttle_store,
        env::CONF.spam_prevention_max_attempts,
        env::CONF.spam_prevention_block_duration,
    );

    let route_guards = RouteGuards {
        ip_gate: ThrottleGuard::ip(ip_throttle.clone()),
        signup_gate: ThrottleGuard::spam(spam_prevention.clone()),
    };

    let ip_throttle = Data::new(ip_throttle);
    let spam_prevention = Data::new(spam_prevention);
    let health_key = Data::new(HealthEndpointKey(env::CONF.health_endpoint_key.clone()));
    let throttle_api_key = Data::new(ThrottleApiKey(env::CONF.throttle_api_key.clone()));

    if env::CONF.throttle_api_key.is_empty() {
        log::warn!("No throttle API key is configured. Failures and resets will be rejected.");
    }

    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(ip_throttle.clone())
            .app_data(spam_prevention.clone())
            .app_data(health_key.clone())
            .app_data(throttle_api_key.clone());

        if let Some(db_thread_pool) = db_thread_pool.as_ref() {
            app = app.app_data(Data::new(db_thread_pool.clone()));
        }

        let route_guards = route_guards.clone();

        app.configure(|cfg| services::api::configure(cfg, route_guards))
            .configure(services::web::configure)
            .wrap(actix_web::middleware::Logger::default())
    })
    .workers(actix_workers)
    .bind(base_addr)?
    .run()
    .await?;

    // All worker threads have been joined by now
    unsafe {
        env::CONF.zeroize();
    }

    Ok(())
}
