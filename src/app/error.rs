use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::anchor::AnchorError;
use crate::attestation::IntakeError;
use crate::claim::ClaimError;
use crate::credential::CredentialError;
use crate::database::Error as StoreError;
use crate::federation::SyncError;
use crate::identity::IdentityError;

/// Crate-wide error composed at the server boundary, mirroring the
/// teacher's `Error -> StatusCode` mapping idiom: every subsystem error
/// type converts in via `#[from]`, and `IntoResponse` is the single place
/// that decides the wire status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Invalid(String),
    #[error("already attested")]
    Conflict,
    #[error("rate limited, current rate {current_rate}")]
    RateLimited { current_rate: u32 },
    #[error("not found")]
    NotFound,
    #[error("anchor failed: {0}")]
    AnchorFailed(#[from] AnchorError),
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IntakeError> for Error {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Invalid(msg) => Self::Invalid(msg),
            IntakeError::Conflict => Self::Conflict,
            IntakeError::RateLimited { current_rate } => Self::RateLimited { current_rate },
            IntakeError::Store(e) => Self::Store(e),
            IntakeError::Credential(e) => Self::Credential(e),
        }
    }
}

impl From<SyncError> for Error {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::PeerUnreachable(_) => Self::PeerUnreachable,
            SyncError::Store(e) => Self::Store(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error:  String,
    reason: Option<String>,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AnchorFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PeerUnreachable => StatusCode::BAD_GATEWAY,
            Self::Identity(IdentityError::NotFound) => StatusCode::NOT_FOUND,
            Self::Identity(IdentityError::InvalidSignature | IdentityError::MalformedKey) => {
                StatusCode::BAD_REQUEST
            }
            Self::Identity(IdentityError::Store(e)) => store_status(e),
            Self::Credential(CredentialError::NotFound) => StatusCode::NOT_FOUND,
            Self::Credential(CredentialError::UnapprovedIssuer) => StatusCode::FORBIDDEN,
            Self::Credential(CredentialError::Store(e)) => store_status(e),
            Self::Claim(ClaimError::NotFound) => StatusCode::NOT_FOUND,
            Self::Claim(ClaimError::Store(e)) => store_status(e),
            Self::Store(e) => store_status(e),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let reason = matches!(self, Self::AnchorFailed(_)).then(|| {
            if let Self::AnchorFailed(ref anchor_err) = self {
                anchor_err.remediation_hint().to_owned()
            } else {
                unreachable!()
            }
        });

        let body = ErrorBody {
            error: self.to_string(),
            reason,
        };

        (status, axum::Json(body)).into_response()
    }
}
