use std::sync::Arc;

use actix_web::middleware::from_fn;
use actix_web::{App, HttpServer};
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;

use goodbooks_api::app_config::config_app;
use goodbooks_api::auth::AuthConfig;
use goodbooks_api::book_store::{BookStore, PostgresBookStore};
use goodbooks_api::bulk_load::in_memory_store;
use goodbooks_api::error::{error_handlers, json_config, path_config, query_config};
use goodbooks_api::query_service::QueryService;
use goodbooks_api::rate_limiter::{rate_limit, RateLimiter};
use goodbooks_api::settings::Settings;
use goodbooks_api::telemetry::init_telemetry;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_telemetry("goodbooks_api")?;
    tracing::info!("Starting HTTP server at http://0.0.0.0:{}", settings.port);

    let book_store: Arc<dyn BookStore> = if settings.use_in_memory_db {
        Arc::new(in_memory_store(settings.data_dir.as_deref()).await?)
    } else {
        Arc::new(PostgresBookStore::init(settings.postgres()).await?)
    };

    let query_service = web::Data::new(QueryService::new(book_store));
    let rate_limiter = web::Data::new(RateLimiter::new(
        settings.rate_limit_requests,
        settings.rate_limit_window(),
    ));
    let auth_config = web::Data::new(AuthConfig {
        api_key: settings.api_key.clone(),
    });

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(query_service.clone())
            .app_data(rate_limiter.clone())
            .app_data(auth_config.clone())
            .app_data(query_config())
            .app_data(json_config())
            .app_data(path_config())
            .wrap(error_handlers())
            .wrap(from_fn(rate_limit))
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
            .default_service(actix_web::web::to(goodbooks_api::handlers::not_found))
    })
    .bind(("0.0.0.0", settings.port))?
    .run()
    .await?;
    Ok(())
}
