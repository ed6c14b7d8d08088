use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::QueryRejection;
use serde::Serialize;
use valuable::Valuable;

use crate::db;

#[derive(thiserror::Error, Serialize, Debug, Clone, Valuable)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Error {
    #[error(transparent)]
    Database(#[from] db::error::Error),
    #[error("invalid data")]
    InvalidData { reason: String },
    #[error("malformed request")]
    MalformedRequest {
        #[serde(skip)]
        #[valuable(skip)]
        status: StatusCode,
        message: String,
    },
}

impl Error {
    fn status_code(&self) -> StatusCode {
        use Error::{Database, InvalidData, MalformedRequest};
        use db::error::Error::{
            DuplicateRecord, InvalidEntry, Other, RecordNotFound, ReferenceNotFound,
        };

        match self {
            InvalidData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Database(inner) => match inner {
                Other { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                DuplicateRecord { .. } => StatusCode::CONFLICT,
                RecordNotFound => StatusCode::NOT_FOUND,
                ReferenceNotFound { .. } | InvalidEntry { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            },
            MalformedRequest { status, .. } => *status,
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(err: JsonRejection) -> Self {
        Self::MalformedRequest {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl From<QueryRejection> for Error {
    fn from(err: QueryRejection) -> Self {
        Self::MalformedRequest {
            status: err.status(),
            message: format!("{err:#}"),
        }
    }
}

impl From<garde::Report> for Error {
    fn from(err: garde::Report) -> Self {
        Self::InvalidData {
            reason: format!("{err:#}"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!(error = self.as_value());

        #[derive(Serialize)]
        struct ErrorResponse {
            status: u16,
            error: Option<Error>,
        }

        let status = self.status_code();

        // Internals of a 500 are for the logs, not the response body
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            None
        } else {
            Some(self)
        };

        (
            status,
            axum::Json(ErrorResponse {
                status: status.as_u16(),
                error,
            }),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
