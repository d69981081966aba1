//! Maps one HTTP exchange onto an intent and runs its handler.

use anyhow::anyhow;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use super::disposition::{ascii_fallback, content_disposition};
use super::intake::{read_payload, SpoolGuard};
use super::state::ServerState;
use crate::common::errors::AppError;
use crate::transfer::{IdDispenser, RequestPayload, Transfer, TransferError};

pub const EXPOSED_HEADERS: &str = "Content-Disposition, Content-Length, X-Content-Transfer-Id";

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    FileTransfer(Transfer),
    RevertFileTransfer(String),
    FetchRemoteFile(String),
    RestoreFileTransfer(String),
    FileLoad(String),
}

impl Intent {
    pub fn ident(&self) -> &'static str {
        match self {
            Intent::FileTransfer(_) => "FILE_TRANSFER",
            Intent::RevertFileTransfer(_) => "REVERT_FILE_TRANSFER",
            Intent::FetchRemoteFile(_) => "FETCH_REMOTE_FILE",
            Intent::RestoreFileTransfer(_) => "RESTORE_FILE_TRANSFER",
            Intent::FileLoad(_) => "FILE_LOAD",
        }
    }
}

/// Everything the classifier looks at, already read off the wire.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Bytes,
    pub payload: RequestPayload,
}

impl ApiRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            body: Bytes::new(),
            payload: RequestPayload::new(),
        }
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Classify a request. `None` means no intent: answer with an empty success.
pub fn parse_api_request(request: &ApiRequest, dispenser: &dyn IdDispenser) -> Option<Intent> {
    match request.method {
        Method::POST => {
            let mut transfer = Transfer::dispense(dispenser);
            // first submitted field wins; no field at all stays an empty transfer
            if let Some(field) = request.payload.field_names().first() {
                transfer.populate(&request.payload, field);
            }
            Some(Intent::FileTransfer(transfer))
        }
        Method::DELETE => Some(Intent::RevertFileTransfer(
            String::from_utf8_lossy(&request.body).into_owned(),
        )),
        Method::GET | Method::HEAD => {
            if let Some(value) = request.query_param("fetch") {
                Some(Intent::FetchRemoteFile(value.to_string()))
            } else if let Some(value) = request.query_param("restore") {
                Some(Intent::RestoreFileTransfer(value.to_string()))
            } else {
                request
                    .query_param("load")
                    .map(|value| Intent::FileLoad(value.to_string()))
            }
        }
        _ => None,
    }
}

/// Entry point mounted on each server's route.
pub async fn handle(State(state): State<ServerState>, request: Request) -> Response {
    match dispatch(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn dispatch(state: &ServerState, request: Request) -> Result<Response, AppError> {
    let (api, _spool) = read_request(state, request).await?;

    let Some(intent) = parse_api_request(&api, state.dispenser.as_ref()) else {
        return Ok(StatusCode::OK.into_response());
    };

    tracing::debug!(server = %state.name, intent = intent.ident(), "Dispatching");

    // _spool lives until the handler returns
    match intent {
        Intent::FileTransfer(transfer) => handle_file_transfer(state, transfer).await,
        Intent::RevertFileTransfer(id) => handle_revert(state, &id).await,
        Intent::FileLoad(path) => handle_load(state, &path).await,
        other @ (Intent::FetchRemoteFile(_) | Intent::RestoreFileTransfer(_)) => {
            Err(AppError::NotHandled(other.ident()))
        }
    }
}

async fn read_request(
    state: &ServerState,
    request: Request,
) -> Result<(ApiRequest, SpoolGuard), AppError> {
    let mut api = ApiRequest::new(request.method().clone());
    if let Ok(Query(query)) = Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
        api.query = query;
    }

    let spool = match api.method {
        Method::POST => {
            let (payload, spool) = read_payload(request, &state.spool_dir).await?;
            api.payload = payload;
            spool
        }
        Method::DELETE => {
            api.body = Bytes::from_request(request, &())
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            SpoolGuard::default()
        }
        _ => SpoolGuard::default(),
    };

    Ok((api, spool))
}

async fn handle_file_transfer(state: &ServerState, transfer: Transfer) -> Result<Response, AppError> {
    // most likely a field name mismatch
    if transfer.files().is_empty() {
        return Err(AppError::BadRequest("No file found in request".to_string()));
    }

    match state
        .manager
        .store_transfer(state.transfer_dir(), &transfer)
        .await
    {
        Ok(()) => {}
        Err(
            e @ (TransferError::MissingPrimaryFile
            | TransferError::UploadFailed { .. }
            | TransferError::ReservedName { .. }),
        ) => {
            return Err(AppError::BadRequest(e.to_string()));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to stage transfer {}", transfer.id()))
                .into());
        }
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        transfer.id().to_string(),
    )
        .into_response())
}

async fn handle_revert(state: &ServerState, body: &str) -> Result<Response, AppError> {
    let id = body.trim();
    if id.is_empty() {
        return Err(AppError::BadRequest("Missing transfer id".to_string()));
    }
    if !state.manager.is_valid_transfer_id(id) {
        return Err(AppError::BadRequest("Invalid transfer id".to_string()));
    }

    if state
        .manager
        .remove_transfer_directory(state.transfer_dir(), id)
        .await
    {
        tracing::info!(transfer_id = %id, "Reverted transfer");
    } else {
        tracing::warn!(transfer_id = %id, "Revert found nothing to remove");
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

fn content_type_header(path: &str, mime_type: &str) -> HeaderValue {
    HeaderValue::from_str(mime_type).unwrap_or_else(|_| {
        tracing::debug!(
            path = %path,
            mime_type = %mime_type,
            "Unusable mime type, serving as octet-stream"
        );
        HeaderValue::from_static("application/octet-stream")
    })
}

async fn handle_load(state: &ServerState, path: &str) -> Result<Response, AppError> {
    let file = state
        .manager
        .read_file(path)
        .await
        .map_err(|e| anyhow::Error::new(e).context(format!("Failed to load '{path}'")))?;

    let fallback = ascii_fallback(&file.name).replace('%', "_");
    let disposition = content_disposition("inline", &file.name, Some(&fallback))
        .map_err(|e| anyhow!("Cannot build Content-Disposition for '{}': {e}", file.name))?;

    let content_type = content_type_header(path, &file.mime_type);
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| anyhow!("Invalid Content-Disposition header: {e}"))?;

    tracing::debug!(path = %path, size = file.length, "Loading file");

    let body = Body::from_stream(ReaderStream::new(file.content));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.length));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );

    Ok(response)
}
