use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

const CACHE_NO_STORE: &str = "no-store";
const HX_REDIRECT_HEADER: &str = "HX-Redirect";

pub fn is_hx_request(headers: &HeaderMap) -> bool {
    headers
        .get("hx-request")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

pub fn fragment_response(fragment_html: String, http_status: StatusCode) -> Response {
    (
        http_status,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, CACHE_NO_STORE),
        ],
        fragment_html,
    )
        .into_response()
}

pub fn redirect_response(location: &str) -> Response {
    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(HX_REDIRECT_HEADER, value);
    }
    response
}

/// Full-browser navigation: `HX-Redirect` for htmx requests, 303 otherwise.
pub fn navigate(headers: &HeaderMap, location: &str) -> Response {
    if is_hx_request(headers) {
        return redirect_response(location);
    }
    Redirect::to(location).into_response()
}

#[cfg(test)]
mod tests {
    use super::{fragment_response, is_hx_request, navigate, redirect_response};
    use axum::body::to_bytes;
    use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
    use axum::http::{HeaderMap, StatusCode};

    #[test]
    fn hx_request_header_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!is_hx_request(&headers));

        headers.insert("hx-request", "TRUE".parse().expect("valid value"));
        assert!(is_hx_request(&headers));

        headers.insert("hx-request", "false".parse().expect("valid value"));
        assert!(!is_hx_request(&headers));
    }

    #[tokio::test]
    async fn fragment_response_sets_html_content_type_and_no_store_cache() {
        let response = fragment_response("<div id=\"kg-countdown\">1h 0m 0s</div>".to_string(), StatusCode::OK);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(
            response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|value| value.to_str().ok()),
            Some("no-store")
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        assert_eq!(body.as_ref(), b"<div id=\"kg-countdown\">1h 0m 0s</div>");
    }

    #[test]
    fn redirect_response_sets_hx_redirect_header() {
        let response = redirect_response("/getkey");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("HX-Redirect")
                .and_then(|value| value.to_str().ok()),
            Some("/getkey")
        );
    }

    #[test]
    fn navigate_uses_see_other_for_plain_requests() {
        let response = navigate(&HeaderMap::new(), "https://lootdest.org/s?abc");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok()),
            Some("https://lootdest.org/s?abc")
        );

        let mut headers = HeaderMap::new();
        headers.insert("hx-request", "true".parse().expect("valid value"));
        let response = navigate(&headers, "/");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("HX-Redirect").is_some());
    }
}
