use axum::{
    extract::Request,
    http::{
        header::{HOST, STRICT_TRANSPORT_SECURITY},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

/// Applied in production, where TLS terminates at the load balancer.
///
/// Requests forwarded over HTTPS get an HSTS header; anything else is
/// permanently redirected to the same host and URI over HTTPS.
pub async fn require_tls(request: Request, next: Next) -> Response {
    let forwarded_https = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|proto| proto.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

    if forwarded_https {
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31557600"),
        );
        return response;
    }

    let Some(host) = request
        .headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    };

    let uri = request
        .uri()
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");
    Redirect::permanent(&format!("https://{host}{uri}")).into_response()
}
