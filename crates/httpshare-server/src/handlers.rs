use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError},
        FromRequest, Multipart, Request, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info, warn};

use crate::{
    consent::{ConsentDesk, ConsentRequest},
    endpoint::{Endpoint, Target},
    tofc::remote_addr,
};

/// A one-shot byte source such as stdin.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

// ── Shares ────────────────────────────────────────────────────────────────────

/// Handler state for one shared endpoint.
pub struct Share {
    pub endpoint: Endpoint,
    /// Present for stream targets until the first request takes it.
    stream: Mutex<Option<ByteSource>>,
}

impl Share {
    pub fn file(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: Mutex::new(None),
        }
    }

    pub fn stream(endpoint: Endpoint, source: ByteSource) -> Self {
        Self {
            endpoint,
            stream: Mutex::new(Some(source)),
        }
    }

    fn take_stream(&self) -> Option<ByteSource> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub async fn serve_share(State(share): State<Arc<Share>>, request: Request) -> Response {
    let client = client_label(&request);
    let endpoint = &share.endpoint;

    let mut response = match &endpoint.target {
        Target::File(path) => {
            info!(%client, file = %path.display(), "file requested");
            match ServeFile::new(path).oneshot(request).await {
                Ok(res) => res.into_response(),
                Err(never) => match never {},
            }
        }
        Target::Stdin { name } => {
            let Some(source) = share.take_stream() else {
                warn!(%client, %name, "stream requested again after it was consumed");
                return (StatusCode::GONE, "Stream already consumed.").into_response();
            };
            info!(%client, %name, "stream requested");
            let mut res = Body::from_stream(ReaderStream::new(source)).into_response();
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            res
        }
    };

    let disposition = HeaderValue::from_str(&endpoint.content_disposition())
        .unwrap_or_else(|_| HeaderValue::from_static(endpoint.visibility.as_str()));
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    response
}

// ── Upload ────────────────────────────────────────────────────────────────────

const UPLOAD_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8" />
  </head>
  <body>
    <form action="upload" method="post" enctype="multipart/form-data">
      <label for="file">Filename:</label>
      <input type="file" name="file" id="file"><br>
      <input type="submit" name="submit" value="Submit">
    </form>
  </body>
</html>
"#;

const UPLOAD_DONE_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8" />
  </head>
  <body>
    <h1>Upload successful</h1>
  </body>
</html>
"#;

/// Handler state for receive mode.
pub struct Inbox {
    pub dir: PathBuf,
    pub desk: ConsentDesk,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload stream failed: {0}")]
    Stream(#[from] MultipartError),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("could not move upload into place: {0}")]
    Persist(#[from] tempfile::PathPersistError),
}

pub async fn upload_page() -> Html<&'static str> {
    Html(UPLOAD_PAGE)
}

pub async fn receive_upload(State(inbox): State<Arc<Inbox>>, request: Request) -> Response {
    let requester = client_label(&request);

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(m) => m,
        Err(rejection) => {
            warn!(%requester, error = %rejection, "upload is not multipart form data");
            return bad_form();
        }
    };

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                return accept_field(&inbox, requester, field).await;
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                warn!(%requester, "upload without a file field");
                return bad_form();
            }
            Err(e) => {
                warn!(%requester, error = %e, "malformed multipart body");
                return bad_form();
            }
        }
    }
}

async fn accept_field(inbox: &Inbox, requester: String, field: Field<'_>) -> Response {
    let Some(name) = field.file_name().and_then(sanitize_file_name) else {
        warn!(%requester, "upload without a usable file name");
        return bad_form();
    };
    let destination = inbox.dir.join(name);

    let request = ConsentRequest {
        requester,
        destination: destination.clone(),
        overwrite: destination.exists(),
    };
    if !inbox.desk.ask(request).await {
        info!(destination = %destination.display(), "upload rejected");
        return (StatusCode::UNAUTHORIZED, "Upload rejected.").into_response();
    }

    match store(&inbox.dir, &destination, field).await {
        Ok(bytes) => {
            info!(destination = %destination.display(), bytes, "upload completed");
            Html(UPLOAD_DONE_PAGE).into_response()
        }
        Err(UploadError::Stream(e)) => {
            warn!(destination = %destination.display(), error = %e, "upload aborted by client");
            bad_form()
        }
        Err(e) => {
            error!(destination = %destination.display(), error = %e, "upload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "There was an error during upload.",
            )
                .into_response()
        }
    }
}

/// Stream a field into a temp file next to `destination`, then rename it
/// over the destination. Nothing is left behind on failure.
async fn store(dir: &Path, destination: &Path, mut field: Field<'_>) -> Result<u64, UploadError> {
    let temp = tempfile::Builder::new()
        .prefix(".httpshare-upload-")
        .tempfile_in(dir)?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644))?;
    }
    temp_path.persist(destination)?;
    Ok(written)
}

/// Keep only the final path component of a client-supplied file name.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return None;
    }
    Some(name.to_owned())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn client_label(request: &Request) -> String {
    remote_addr(request)
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".into())
}

fn bad_form() -> Response {
    (StatusCode::BAD_REQUEST, "Could not parse form data").into_response()
}
