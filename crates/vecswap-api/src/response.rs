//! Response envelope and error-to-status mapping shared by all handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use vecswap_build::CoordinatorError;
use vecswap_router::RouterError;
use vecswap_state::{RegistryError, StateError};
use vecswap_swap::SwapError;

/// Every JSON body is `{success, data?, error?}`.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub(crate) fn registry_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::DuplicateVersion(_)
        | RegistryError::InvalidTransition { .. }
        | RegistryError::ActiveVersionExists(_) => StatusCode::CONFLICT,
        RegistryError::InvalidInitialStatus(_) => StatusCode::BAD_REQUEST,
        RegistryError::NoActiveVersion => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn router_status(err: &RouterError) -> StatusCode {
    match err {
        RouterError::InvalidPercentage(_) => StatusCode::BAD_REQUEST,
        RouterError::TargetIsActive(_) => StatusCode::CONFLICT,
        RouterError::NoActiveVersion => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub(crate) fn swap_status(err: &SwapError) -> StatusCode {
    match err {
        SwapError::SwapAlreadyInProgress(_) | SwapError::NotCancellable { .. } => StatusCode::CONFLICT,
        SwapError::VersionNotReady { .. } | SwapError::UnderReview { .. } => {
            StatusCode::PRECONDITION_FAILED
        }
        SwapError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SwapError::NotFound(_) => StatusCode::NOT_FOUND,
        SwapError::InvalidThreshold(_) => StatusCode::BAD_REQUEST,
        SwapError::Registry(e) => registry_status(e),
        SwapError::Router(e) => router_status(e),
        SwapError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn coordinator_status(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::Registry(e) => registry_status(e),
        CoordinatorError::Submit { .. } => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn registry_error(err: RegistryError) -> Response {
    error_response(&err.to_string(), registry_status(&err))
}

pub(crate) fn state_error(err: StateError) -> Response {
    error_response(&err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

pub(crate) fn swap_error(err: SwapError) -> Response {
    error_response(&err.to_string(), swap_status(&err))
}
