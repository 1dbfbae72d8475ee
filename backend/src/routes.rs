use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use futures_util::TryStreamExt;
use log::{error, info, warn};
use shared::{ErrorResponse, ImageListResponse};
use std::io::ErrorKind;

use crate::pipeline::{PipelineError, UploadPipeline, UploadedImage};
use crate::storage::local_service::Area;

const FILE_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/upload").route(web::post().to(upload_image)))
        .service(web::resource("/images").route(web::get().to(list_images)))
        .service(web::resource("/images/{filename}").route(web::get().to(get_image)))
        .service(web::resource("/processed/{filename}").route(web::get().to(get_processed_image)))
        .service(web::resource("/health").route(web::get().to(health)));
}

fn error_response(err: &PipelineError) -> HttpResponse {
    let body = ErrorResponse::new(err.client_message());
    match err {
        PipelineError::InvalidFilename(_) | PipelineError::ImageDecode(_) => {
            HttpResponse::BadRequest().json(body)
        }
        PipelineError::TooLarge { .. } => HttpResponse::PayloadTooLarge().json(body),
        PipelineError::ModelUnavailable => HttpResponse::ServiceUnavailable().json(body),
        PipelineError::Storage(_) | PipelineError::Inference(_) | PipelineError::Artifact(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Reads the `file` field of a multipart form, stopping as soon as it
/// outgrows `limit`. Other fields are drained and ignored.
async fn read_upload(
    payload: &mut Multipart,
    limit: usize,
) -> Result<Result<Option<UploadedImage>, PipelineError>, Error> {
    let mut upload = None;

    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);

        let wanted = upload.is_none() && field.name() == Some(FILE_FIELD);
        let Some(filename) = filename.filter(|_| wanted) else {
            while field.try_next().await?.is_some() {}
            continue;
        };

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            let size = data.len() + chunk.len();
            if size > limit {
                return Ok(Err(PipelineError::TooLarge { size, limit }));
            }
            data.extend_from_slice(&chunk);
        }
        upload = Some(UploadedImage { filename, data });
    }

    Ok(Ok(upload))
}

async fn upload_image(
    pipeline: web::Data<UploadPipeline>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let limit = pipeline.storage().max_upload_bytes();

    let upload = match read_upload(&mut payload, limit).await? {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            warn!("Upload request without a `{}` file field", FILE_FIELD);
            return Ok(HttpResponse::BadRequest()
                .json(ErrorResponse::new("Missing `file` field in multipart form")));
        }
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return Ok(error_response(&e));
        }
    };

    let pipeline = pipeline.clone();
    let outcome = web::block(move || pipeline.process(upload)).await?;

    match outcome {
        Ok(report) => Ok(HttpResponse::Ok().json(report.result.into_response(report.filename))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn list_images(pipeline: web::Data<UploadPipeline>) -> Result<HttpResponse, Error> {
    let pipeline = pipeline.clone();
    match web::block(move || pipeline.storage().list(Area::Raw)).await? {
        Ok(images) => {
            info!("Listing {} stored images", images.len());
            Ok(HttpResponse::Ok().json(ImageListResponse { images }))
        }
        Err(e) => {
            error!("Failed to list images: {}", e);
            Ok(HttpResponse::InternalServerError()
                .json(ErrorResponse::new("Failed to list images")))
        }
    }
}

async fn get_image(
    req: HttpRequest,
    pipeline: web::Data<UploadPipeline>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    serve_file(&req, &pipeline, Area::Raw, &path.into_inner()).await
}

async fn get_processed_image(
    req: HttpRequest,
    pipeline: web::Data<UploadPipeline>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    serve_file(&req, &pipeline, Area::Processed, &path.into_inner()).await
}

async fn serve_file(
    req: &HttpRequest,
    pipeline: &UploadPipeline,
    area: Area,
    filename: &str,
) -> Result<HttpResponse, Error> {
    let file_path = match pipeline.storage().path_for(area, filename) {
        Ok(file_path) => file_path,
        Err(e) => {
            warn!("Refusing to serve {:?}: {}", filename, e);
            return Ok(HttpResponse::BadRequest().json(ErrorResponse::new("Invalid filename")));
        }
    };

    match NamedFile::open_async(&file_path).await {
        Ok(file) => Ok(file.into_response(req)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Ok(HttpResponse::NotFound().json(ErrorResponse::new("Image not found")))
        }
        Err(e) => {
            error!("Failed to open {}: {}", file_path.display(), e);
            Err(e.into())
        }
    }
}

async fn health(pipeline: web::Data<UploadPipeline>) -> HttpResponse {
    HttpResponse::Ok().json(pipeline.model().status())
}
