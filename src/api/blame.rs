use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use git2::Repository;

use super::{history_error, internal_error, ApiError};
use crate::blame::annotate::{annotate_diff, annotate_file};
use crate::blame::{diff_blame, file_blame};
use crate::git::{parent_commit, read_file_at};
use crate::models::{DiffFile, DiffResponse, FileBlameResponse};
use crate::state::{AppState, BlameRepo};

fn find_repo(state: &AppState, name: &str) -> Result<Arc<BlameRepo>, ApiError> {
    state
        .repo(name)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown repository {name}")))
}

/// GET /api/v1/blame/{repo}/{commit}/{*path} - A file as of `commit`,
/// each line paired with the commit that introduced it and the commit that
/// next changes it
pub async fn file_blame_handler(
    State(state): State<AppState>,
    Path((repo, commit, path)): Path<(String, String, String)>,
) -> Result<Json<FileBlameResponse>, ApiError> {
    let blame_repo = find_repo(&state, &repo)?;

    tokio::task::spawn_blocking(move || -> Result<Json<FileBlameResponse>, ApiError> {
        let result = file_blame(&blame_repo.history, &commit, &path).map_err(history_error)?;

        let git = Repository::open(&blame_repo.config.path)
            .map_err(|e| internal_error("Failed to open repository", e))?;
        let text = read_file_at(&git, &commit, &path)
            .map_err(|e| internal_error("Failed to read file", e))?
            .ok_or_else(|| {
                (
                    StatusCode::NOT_FOUND,
                    format!("file {path} is not in the repository at {commit}"),
                )
            })?;

        Ok(Json(FileBlameResponse {
            lines: annotate_file(&result, &text),
            previous_commit: result.previous_commit_hash,
            next_commit: result.next_commit_hash,
            repo,
            commit,
            path,
        }))
    })
    .await
    .map_err(|e| internal_error("Blame task failed", e))?
}

/// GET /api/v1/diff/{repo}/{commit} - Every file `commit` touched, as
/// side-by-side rows annotated with blame on both sides
pub async fn diff_handler(
    State(state): State<AppState>,
    Path((repo, commit)): Path<(String, String)>,
) -> Result<Json<DiffResponse>, ApiError> {
    let blame_repo = find_repo(&state, &repo)?;

    tokio::task::spawn_blocking(move || -> Result<Json<DiffResponse>, ApiError> {
        let history = &blame_repo.history;
        let diff_ids = history.commit_diffs(&commit).ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("no such commit: {commit}"),
            )
        })?;

        let git = Repository::open(&blame_repo.config.path)
            .map_err(|e| internal_error("Failed to open repository", e))?;
        let parent = parent_commit(&git, &commit)
            .map_err(|e| internal_error("Failed to resolve parent", e))?;

        let mut files = Vec::with_capacity(diff_ids.len());
        for id in diff_ids {
            let path = &history.diff(*id).path;
            let result = diff_blame(history, &commit, path).map_err(history_error)?;

            let old_text = match &parent {
                Some(parent) => read_file_at(&git, parent, path)
                    .map_err(|e| internal_error("Failed to read file", e))?
                    .unwrap_or_default(),
                None => String::new(),
            };
            let new_text = read_file_at(&git, &commit, path)
                .map_err(|e| internal_error("Failed to read file", e))?
                .unwrap_or_default();

            files.push(DiffFile {
                path: path.clone(),
                rows: annotate_diff(&result, &old_text, &new_text),
                previous_commit: result.previous_commit_hash,
                next_commit: result.next_commit_hash,
                hunks: result.hunks,
            });
        }

        Ok(Json(DiffResponse {
            repo,
            commit,
            parent,
            files,
        }))
    })
    .await
    .map_err(|e| internal_error("Diff task failed", e))?
}
