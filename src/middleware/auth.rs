use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::auth::{AuthError, Claims};
use crate::error::ApiError;
use crate::state::AppState;
use crate::types::TenantNamespace;

pub const TRACE_ID_HEADER: &str = "trace-id";
pub const TENANT_NAMESPACE_HEADER: &str = "tenant-namespace";

/// Authorized request context, inserted as a request extension.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub tenant: TenantNamespace,
    pub trace_id: String,
    pub claims: Claims,
}

/// Requires `trace-id` and `tenant-namespace` headers, then a bearer token the
/// gate accepts for that tenant.
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = required_header(&headers, TRACE_ID_HEADER)?;
    let tenant = TenantNamespace::parse(&required_header(&headers, TENANT_NAMESPACE_HEADER)?)?;

    let token = extract_jwt_from_headers(&headers).map_err(AuthError::MissingCredential)?;
    let claims = state.gate.authorize(&token, &tenant)?;

    tracing::debug!(trace_id = %trace_id, tenant = %tenant, subject = %claims.sub, "request authorized");
    request.extensions_mut().insert(AuthUser {
        tenant,
        trace_id,
        claims,
    });

    Ok(next.run(request).await)
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(format!("Missing {name} header")))
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn bearer_token_is_extracted() {
        let h = headers(&[("authorization", "Bearer abc.def.ghi")]);
        assert_eq!(extract_jwt_from_headers(&h).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn non_bearer_schemes_are_rejected() {
        assert!(extract_jwt_from_headers(&headers(&[("authorization", "Basic Zm9vOmJhcg==")])).is_err());
        assert!(extract_jwt_from_headers(&headers(&[("authorization", "Bearer   ")])).is_err());
        assert!(extract_jwt_from_headers(&HeaderMap::new()).is_err());
    }

    #[test]
    fn blank_required_header_is_missing() {
        let h = headers(&[(TRACE_ID_HEADER, "  ")]);
        assert!(matches!(required_header(&h, TRACE_ID_HEADER), Err(ApiError::BadRequest(_))));
        let h = headers(&[(TRACE_ID_HEADER, "t-1")]);
        assert_eq!(required_header(&h, TRACE_ID_HEADER).unwrap(), "t-1");
    }
}
