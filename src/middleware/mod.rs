pub mod auth;
pub mod response;

pub use auth::{jwt_auth_middleware, AuthUser, TENANT_NAMESPACE_HEADER, TRACE_ID_HEADER};
pub use response::{ApiResponse, ApiResult};
