//! Control routes: temp blobs, webhooks, repository-wide git and meta

use super::files::{author, header_flag, header_str};
use super::AppState;
use crate::error::{ReposerveError, ReposerveResult};
use crate::repository::{check_repository_name, decode_path, Repository};
use crate::sync::SyncOutcome;
use crate::vcs::{DiffTarget, SyncRequest};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::info;

const GIT_REPOSITORY: &str = "gitrepository";
const GIT_BRANCH: &str = "gitrepositorybranch";
const GIT_MESSAGE: &str = "gitcommitmessage";
const GIT_FILE_PATH: &str = "gitfilepath";
const GIT_COMMIT: &str = "gitcommit";
const GIT_REPOSITORY_URL: &str = "gitrepositoryurl";
const DRY_RUN: &str = "dryrun";
const REPOSITORY_NAME: &str = "repositoryname";
const LOG_LIMIT: usize = 100;
const GRAPH_LIMIT: usize = 100;

pub async fn tmp_get(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.tmp.get(&name) {
        Some(bytes) => bytes.into_response(),
        None => (StatusCode::NOT_FOUND, format!("no temp file {}", name)).into_response(),
    }
}

pub async fn tmp_put(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> StatusCode {
    state.tmp.put(&name, body.to_vec());
    StatusCode::OK
}

/// Long-poll until the next webhook for the `repositoryname` header
pub async fn webhook_register(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(key) = header_str(&headers, REPOSITORY_NAME) else {
        return ReposerveError::InvalidArgument {
            name: "repositoryname header",
            value: String::new(),
        }
        .into_response();
    };
    match state.webhooks.register(key).await {
        Ok(payload) => payload.into_response(),
        // relay dropped while waiting: the server is going away
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

pub async fn webhook_signal(State(state): State<AppState>, body: Bytes) -> Response {
    match state.webhooks.signal(&body) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn meta(State(state): State<AppState>, Path(command): Path<String>) -> Response {
    if command == "exit" {
        info!("Exit requested over HTTP");
        state.request_shutdown();
        return "goodbye, we hope for the best!".into_response();
    }
    (
        StatusCode::NOT_IMPLEMENTED,
        format!("meta: {} not implemented!", command),
    )
        .into_response()
}

pub async fn git_operation(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    headers: HeaderMap,
) -> Response {
    run_git_operation(&state, &operation, &headers)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

fn required<'a>(headers: &'a HeaderMap, name: &'static str) -> ReposerveResult<&'a str> {
    header_str(headers, name).ok_or(ReposerveError::InvalidArgument {
        name,
        value: String::new(),
    })
}

async fn run_git_operation(
    state: &AppState,
    operation: &str,
    headers: &HeaderMap,
) -> ReposerveResult<Response> {
    let name = check_repository_name(required(headers, GIT_REPOSITORY)?)?;
    let repo = Repository::new(name, state.root_dir.join(name), Arc::clone(&state.layout));
    let dry_run = header_flag(headers, DRY_RUN);
    info!("git control: {} on {}", operation, name);

    let outcome = match operation {
        "sync" => {
            let request = SyncRequest {
                branch: required(headers, GIT_BRANCH)?.to_string(),
                message: header_str(headers, GIT_MESSAGE)
                    .unwrap_or_default()
                    .to_string(),
                author: author(headers),
            };
            state.operations.sync(&repo, &request, dry_run).await?
        }
        "checkout" => {
            let branch = required(headers, GIT_BRANCH)?;
            let path = decode_path(required(headers, GIT_FILE_PATH)?)?;
            state
                .operations
                .checkout(&repo, branch, path.trim_start_matches('/'), dry_run)
                .await?
        }
        "status" | "log" | "graph" | "branches" | "remoteurl" | "diff" | "commit" | "clone"
            if dry_run =>
        {
            SyncOutcome::DryRun(format!("{} {}", operation, name))
        }
        "status" => SyncOutcome::Completed(state.vcs.status(repo.root()).await?),
        "log" => SyncOutcome::Completed(state.vcs.log(repo.root(), LOG_LIMIT).await?),
        "graph" => SyncOutcome::Completed(state.vcs.graph(repo.root(), GRAPH_LIMIT).await?),
        "branches" => SyncOutcome::Completed(state.vcs.branches(repo.root()).await?),
        "remoteurl" => SyncOutcome::Completed(state.vcs.remote_url(repo.root()).await?),
        "diff" => {
            let target = match header_str(headers, GIT_COMMIT) {
                Some(commit) => DiffTarget::Commit(commit.to_string()),
                None => DiffTarget::Remote(required(headers, GIT_BRANCH)?.to_string()),
            };
            SyncOutcome::Completed(state.vcs.diff(repo.root(), &target).await?)
        }
        "commit" => {
            let message = required(headers, GIT_MESSAGE)?;
            SyncOutcome::Completed(
                state
                    .vcs
                    .commit_all(repo.root(), &author(headers), message)
                    .await?,
            )
        }
        "clone" => {
            let url = required(headers, GIT_REPOSITORY_URL)?;
            SyncOutcome::Completed(
                state
                    .vcs
                    .clone_repository(&state.root_dir, url, name)
                    .await?,
            )
        }
        other => {
            return Ok((
                StatusCode::NOT_FOUND,
                format!("git operation {} not supported", other),
            )
                .into_response())
        }
    };

    let body = match outcome {
        SyncOutcome::Completed(transcript) => transcript,
        SyncOutcome::InProgress => format!("Sync in progress: {}", name),
        SyncOutcome::DryRun(description) => description,
    };
    Ok(body.into_response())
}
