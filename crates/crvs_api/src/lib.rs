//! Request/response layer over `crvs_core`.
//!
//! Transports (HTTP, RPC, CLI) call these endpoints with a bearer token and a
//! decoded body and serialize the returned envelope.

pub mod api;
pub mod error;

pub use api::{
    ActionAccepted, ActionRequest, ApiContext, ApiResponse, ApiResult, DraftRequest,
    STATUS_ACCEPTED, STATUS_NO_CONTENT, STATUS_OK,
};
pub use error::ApiError;
