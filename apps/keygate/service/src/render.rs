use super::*;

const CACHE_NO_STORE: &str = "no-store";
const HEADER_CONTENT_SECURITY_POLICY: &str = "content-security-policy";
const HEADER_REFERRER_POLICY: &str = "referrer-policy";
const HEADER_X_CONTENT_TYPE_OPTIONS: &str = "x-content-type-options";
const HEADER_X_FRAME_OPTIONS: &str = "x-frame-options";
const HEADER_PERMISSIONS_POLICY: &str = "permissions-policy";
const HTML_REFERRER_POLICY: &str = "strict-origin-when-cross-origin";
const HTML_X_FRAME_OPTIONS: &str = "DENY";
const HTML_PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), clipboard-write=(self)";
const X_CONTENT_TYPE_OPTIONS_NOSNIFF: &str = "nosniff";
const TURNSTILE_ORIGIN: &str = "https://challenges.cloudflare.com";
const IMAGE_ORIGINS: &str =
    "https://cdn.discordapp.com https://creators.lootlabs.gg https://linkvertise.com";

pub(super) fn page_response(state: &AppState, status: StatusCode, page: WebPage) -> Response {
    let nonce = Uuid::new_v4().simple().to_string();
    let context = RenderContext {
        site_title: state.config.site_title.clone(),
        htmx_asset_path: state.config.htmx_asset_path.clone(),
        nonce,
    };

    let mut response = (
        status,
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, CACHE_NO_STORE),
        ],
        render_page(&page, &context),
    )
        .into_response();
    apply_html_security_headers(response.headers_mut(), &context.nonce);
    response
}

pub(super) fn countdown_response(fragment_html: String) -> Response {
    let mut response = crate::web_htmx::fragment_response(fragment_html, StatusCode::OK);
    apply_html_security_headers(response.headers_mut(), &Uuid::new_v4().simple().to_string());
    response
}

pub(super) fn user_view(context: &SessionContext) -> Option<UserView> {
    let user = context.user()?;
    Some(UserView {
        username: user.display_name().to_string(),
        avatar_url: user.avatar_url(),
        initials: user.initials(),
    })
}

pub(super) fn content_security_policy(nonce: &str) -> String {
    format!(
        "default-src 'self'; \
         script-src 'self' 'nonce-{nonce}' {TURNSTILE_ORIGIN}; \
         frame-src {TURNSTILE_ORIGIN}; \
         img-src 'self' data: {IMAGE_ORIGINS}; \
         style-src 'self' 'unsafe-inline'; \
         connect-src 'self'; \
         base-uri 'none'; \
         object-src 'none'; \
         frame-ancestors 'none'"
    )
}

pub(super) fn apply_html_security_headers(headers: &mut HeaderMap, nonce: &str) {
    match HeaderValue::from_str(&content_security_policy(nonce)) {
        Ok(value) => {
            headers.insert(HEADER_CONTENT_SECURITY_POLICY, value);
        }
        Err(error) => {
            tracing::warn!(%error, "failed to encode content security policy");
        }
    }
    headers.insert(
        HEADER_REFERRER_POLICY,
        HeaderValue::from_static(HTML_REFERRER_POLICY),
    );
    headers.insert(
        HEADER_X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static(X_CONTENT_TYPE_OPTIONS_NOSNIFF),
    );
    headers.insert(
        HEADER_X_FRAME_OPTIONS,
        HeaderValue::from_static(HTML_X_FRAME_OPTIONS),
    );
    headers.insert(
        HEADER_PERMISSIONS_POLICY,
        HeaderValue::from_static(HTML_PERMISSIONS_POLICY),
    );
}
