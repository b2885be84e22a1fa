//! JSON HTTP API over a [`KvRunner`].
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `POST` | `/api/instances` | create (`{"id": "...", "port": optional}`) |
//! | `GET` | `/api/instances` | list |
//! | `GET` | `/api/instances/{id}` | get |
//! | `DELETE` | `/api/instances/{id}` | delete |
//! | `POST` | `/api/instances/{id}/start` | start |
//! | `POST` | `/api/instances/{id}/stop` | stop |
//! | `GET` | `/api/instances/{id}/status` | status |
//! | `POST` | `/api/reconcile` | reconcile |
//! | `GET` | `/health` | liveness of the API itself |

mod error;
pub mod handlers;
pub mod types;

use crate::KvRunner;
use crate::config::{DEFAULT_WORKERS, HttpConfig};
use crate::error::{Error, Result};
use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{App, HttpServer, middleware, web};

/// Register the API routes on an Actix Web app.
///
/// The runner must be provided as `web::Data<KvRunner>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(handlers::json_error))
        .route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/api")
                .route("/reconcile", web::post().to(handlers::reconcile))
                .service(
                    web::resource("/instances")
                        .route(web::get().to(handlers::list_instances))
                        .route(web::post().to(handlers::create_instance)),
                )
                .service(
                    web::resource("/instances/{id}")
                        .route(web::get().to(handlers::get_instance))
                        .route(web::delete().to(handlers::delete_instance)),
                )
                .route("/instances/{id}/start", web::post().to(handlers::start_instance))
                .route("/instances/{id}/stop", web::post().to(handlers::stop_instance))
                .route("/instances/{id}/status", web::get().to(handlers::instance_status)),
        );
}

/// Bind the HTTP API and return the server future.
///
/// Signal handling is left to the caller, which stops the server through
/// [`Server::handle`].
pub fn serve(runner: KvRunner, config: &HttpConfig) -> Result<Server> {
    let addr = format!("{}:{}", config.address, config.port);
    tracing::info!(address = %addr, "Starting HTTP API");

    let runner = web::Data::new(runner);
    let mut server_builder = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(runner.clone())
            .configure(configure)
    });

    let workers = config.workers.unwrap_or(DEFAULT_WORKERS);
    tracing::info!(workers = workers, "Setting number of Actix Web workers");
    server_builder = server_builder.workers(workers).disable_signals();

    let server = server_builder
        .bind(&addr)
        .map_err(|e| Error::Other(format!("Failed to bind HTTP server to {}: {}", addr, e)))?
        .run();

    Ok(server)
}
