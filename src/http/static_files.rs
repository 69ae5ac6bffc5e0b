//! Static file serving for `root` + `file_server` sites.
//!
//! # Responsibilities
//! - Map a request path onto the site's root directory
//! - Refuse anything that would leave the root (403)
//! - Serve the file with a Content-Type guessed from its extension
//!
//! # Design Decisions
//! - The path is percent-decoded before `..` segments are checked, so
//!   `%2e%2e` cannot sneak past
//! - The resolved path is canonicalized and compared with the canonical
//!   root, which also catches symlinks pointing outside
//! - Directories serve their `index.html`; there is no listing
//! - File bodies are streamed, never read into memory whole

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Response, StatusCode},
};
use tokio_util::io::ReaderStream;

use crate::error::ProxyError;
use crate::routing::FilesystemRoot;

const INDEX_FILE: &str = "index.html";

/// Answer a request for `request_path` from `root`.
pub async fn serve(root: &FilesystemRoot, method: &Method, request_path: &str) -> Result<Response<Body>, ProxyError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(ProxyError::MethodNotAllowed(method.to_string()));
    }

    let relative = sanitize(request_path)?;
    let path = resolve(&root.path, &relative, request_path).await?;

    // Length comes from the handle being streamed, not a second lookup.
    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProxyError::FileNotFound(request_path.to_string()),
        _ => ProxyError::Io(e),
    })?;
    let length = file.metadata().await?.len();

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(file))
    };

    tracing::debug!(path = %path.display(), bytes = length, "Serving file");

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

/// Turn a URI path into a relative filesystem path made of plain segments.
fn sanitize(request_path: &str) -> Result<PathBuf, ProxyError> {
    // Non-UTF-8 names are never served.
    let decoded = urlencoding::decode(request_path)
        .map_err(|_| ProxyError::FileNotFound(request_path.to_string()))?;

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ProxyError::PathTraversal(request_path.to_string())),
            s if s.contains('\\') || s.contains('\0') => {
                return Err(ProxyError::PathTraversal(request_path.to_string()))
            }
            s => relative.push(s),
        }
    }
    Ok(relative)
}

/// Resolve `relative` under `root`, following symlinks, and make sure the
/// result is still inside `root`.
async fn resolve(root: &Path, relative: &Path, request_path: &str) -> Result<PathBuf, ProxyError> {
    let not_found = || ProxyError::FileNotFound(request_path.to_string());

    let root = tokio::fs::canonicalize(root).await.map_err(|e| {
        tracing::error!(root = %root.display(), error = %e, "File root is not accessible");
        not_found()
    })?;
    let mut path = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(|_| not_found())?;
    if !path.starts_with(&root) {
        return Err(ProxyError::PathTraversal(request_path.to_string()));
    }

    if tokio::fs::metadata(&path).await.map_err(|_| not_found())?.is_dir() {
        path.push(INDEX_FILE);
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(not_found());
        }
    }
    Ok(path)
}
