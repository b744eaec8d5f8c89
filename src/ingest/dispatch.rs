//! Ingestion path selection: which handler a request body goes to.

use super::UploadedFile;
use crate::constants::FILES_FIELD;
use crate::error::{GatewayError, Result};
use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPath {
    /// multipart/form-data carrying `files` parts
    Files,
    /// JSON body carrying `blobs`
    Blobs,
    Unsupported,
}

impl IngestPath {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            return IngestPath::Unsupported;
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if mime == "multipart/form-data" {
            IngestPath::Files
        } else if mime == "application/json" || mime.ends_with("+json") {
            IngestPath::Blobs
        } else {
            IngestPath::Unsupported
        }
    }
}

/// Collect the `files` parts of a multipart request. Any other body yields
/// no files.
pub async fn collect_files<S>(req: Request<Body>, state: &S) -> Result<Vec<UploadedFile>>
where
    S: Send + Sync,
{
    if IngestPath::from_headers(req.headers()) != IngestPath::Files {
        return Ok(Vec::new());
    }
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|rejection| GatewayError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        })?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        // Parts without a filename are plain form values
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(multipart_error)?;
        files.push(UploadedFile { file_name, bytes });
    }
    Ok(files)
}

pub async fn read_body<S>(req: Request<Body>, state: &S) -> Result<Bytes>
where
    S: Send + Sync,
{
    Bytes::from_request(req, state)
        .await
        .map_err(|rejection| GatewayError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        })
}

/// A body over the configured limit surfaces as 413, anything else as 400.
fn multipart_error(e: MultipartError) -> GatewayError {
    GatewayError::Rejected {
        status: e.status(),
        message: e.body_text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        h
    }

    #[test]
    fn selects_path_from_content_type() {
        assert_eq!(
            IngestPath::from_headers(&headers("multipart/form-data; boundary=abc")),
            IngestPath::Files
        );
        assert_eq!(
            IngestPath::from_headers(&headers("application/json")),
            IngestPath::Blobs
        );
        assert_eq!(
            IngestPath::from_headers(&headers("Application/JSON; charset=utf-8")),
            IngestPath::Blobs
        );
        assert_eq!(
            IngestPath::from_headers(&headers("application/vnd.api+json")),
            IngestPath::Blobs
        );
        assert_eq!(
            IngestPath::from_headers(&headers("text/csv")),
            IngestPath::Unsupported
        );
        assert_eq!(IngestPath::from_headers(&HeaderMap::new()), IngestPath::Unsupported);
    }
}
