use mime_guess::from_path;
use spin_sdk::http::Response;

use crate::core::errors::{AppError, AppResult};
use crate::templates::Assets;

/// Serve an embedded asset for `/static/{file}`.
pub fn serve_static(path: &str) -> AppResult<Response> {
    let file_path = path.trim_start_matches("/static/");
    if file_path.is_empty() || file_path.contains("..") {
        return Err(AppError::not_found("File", path));
    }

    let file = Assets::get(file_path).ok_or_else(|| AppError::not_found("File", path))?;
    let mime = from_path(file_path).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("content-type", mime.as_ref())
        .header("cache-control", "public, max-age=3600")
        .body(file.data.to_vec())
        .build())
}
