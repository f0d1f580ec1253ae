//! File requests: everything not claimed by a control route

use super::AppState;
use crate::error::ReposerveResult;
use crate::files::{FileRead, OptionsQuery};
use crate::repository::{resolve, Repository};
use crate::vcs::Author;
use crate::write::{WriteOutcome, WriteRequest};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use tracing::debug;

/// Request headers of the file protocol
pub mod protocol {
    pub const FILE_VERSION: &str = "fileversion";
    pub const MODIFIED: &str = "modified";
    pub const LAST_VERSION: &str = "lastversion";
    pub const NO_COMMIT: &str = "nocommit";
    pub const SHOW_VERSIONS: &str = "showversions";
    pub const FILE_LIST: &str = "filelist";
    pub const GIT_USERNAME: &str = "gitusername";
    pub const GIT_EMAIL: &str = "gitemail";
}

/// Non-empty header value as a string
pub(super) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(super) fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name) == Some("true")
}

pub(super) fn author(headers: &HeaderMap) -> Author {
    Author {
        name: header_str(headers, protocol::GIT_USERNAME).map(str::to_string),
        email: header_str(headers, protocol::GIT_EMAIL).map(str::to_string),
    }
}

fn set_header(response: &mut Response, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
        Err(_) => debug!("Dropping unrepresentable {} header", name),
    }
}

/// Route a file request by method
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = match resolve(&state.root_dir, &state.layout, uri.path()) {
        Ok((repo, path)) => {
            debug!(
                "{} repository {} file {}",
                method,
                repo.root().display(),
                path
            );
            handle(&state, &method, &repo, &path, &headers, &body).await
        }
        Err(e) => Err(e),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn handle(
    state: &AppState,
    method: &Method,
    repo: &Repository,
    path: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> ReposerveResult<Response> {
    match method.as_str() {
        "GET" => get(state, repo, path, headers).await,
        "PUT" => put(state, repo, path, headers, body).await,
        "DELETE" => {
            let deleted = state.files.delete(repo, path).await?;
            Ok(format!("deleted {}", deleted.display()).into_response())
        }
        "MKCOL" => {
            let created = state.files.mkcol(repo, path).await?;
            Ok(format!("created directory: {}", created.display()).into_response())
        }
        "OPTIONS" => {
            let query = OptionsQuery {
                show_versions: header_flag(headers, protocol::SHOW_VERSIONS),
                file_list: header_flag(headers, protocol::FILE_LIST),
            };
            let reply = state.files.options(repo, path, query).await?;
            Ok((
                [(header::CONTENT_TYPE, "application/json")],
                reply.to_json()?,
            )
                .into_response())
        }
        _ => Ok((
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{} is not supported", method),
        )
            .into_response()),
    }
}

async fn get(
    state: &AppState,
    repo: &Repository,
    path: &str,
    headers: &HeaderMap,
) -> ReposerveResult<Response> {
    if let Some(version) =
        header_str(headers, protocol::FILE_VERSION).filter(|v| *v != "undefined")
    {
        if !repo.is_bundle(path) {
            let content = state.files.read_version(repo, path, version).await?;
            let content_type = mime_guess::from_path(path).first_or_octet_stream();
            let mut response =
                ([(header::CONTENT_TYPE, content_type.essence_str())], content).into_response();
            set_header(&mut response, protocol::FILE_VERSION, version);
            return Ok(response);
        }
    }

    match state.files.read(repo, path).await? {
        FileRead::File {
            content,
            content_type,
            version,
            modified,
        } => {
            let mut response = ([(header::CONTENT_TYPE, content_type)], content).into_response();
            set_header(&mut response, protocol::FILE_VERSION, &version);
            set_header(&mut response, protocol::MODIFIED, &modified);
            Ok(response)
        }
        FileRead::Directory(html) => Ok(Html(html).into_response()),
    }
}

async fn put(
    state: &AppState,
    repo: &Repository,
    path: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> ReposerveResult<Response> {
    let request = WriteRequest {
        path,
        body,
        last_version: header_str(headers, protocol::LAST_VERSION),
        no_commit: header_str(headers, protocol::NO_COMMIT).is_some_and(|v| v != "false"),
        author: author(headers),
    };

    match state.writes.write(repo, request).await? {
        WriteOutcome::Written { version, options } => {
            let body = match options {
                Some(options) => serde_json::to_string_pretty(&options)?,
                None => String::new(),
            };
            let mut response =
                ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response();
            set_header(&mut response, protocol::FILE_VERSION, &version);
            Ok(response)
        }
        WriteOutcome::DirectoryCreated(dir) => {
            Ok(format!("created directory: {}", dir.display()).into_response())
        }
    }
}
