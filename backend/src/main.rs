mod config;
mod inference;
mod pipeline;
mod routes;
mod storage;
mod timer;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use config::AppConfig;
use inference::model::ModelHandle;
use log::{error, info, warn};
use pipeline::UploadPipeline;
use routes::configure_routes;
use std::env;
use storage::local_service::LocalStorage;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        info!("Current working directory: {}", current_dir.display());
    } else {
        error!("Failed to get the current working directory.");
    }

    let config = AppConfig::load().map_err(|e| {
        error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let storage = LocalStorage::new(
        &config.upload_dir,
        &config.processed_dir,
        config.max_upload_bytes,
    );
    if let Err(e) = storage.ensure_dirs() {
        error!("Failed to prepare storage directories: {}", e);
        return Err(std::io::Error::other(e.to_string()));
    }

    let model = ModelHandle::load(&config.model_path);
    if !model.is_ready() {
        warn!(
            "Classification disabled: no model available at {}",
            config.model_path.display()
        );
    }

    let pipeline = web::Data::new(UploadPipeline::new(storage, model, config.save_processed));

    let bind_address = config.bind_address();
    info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
