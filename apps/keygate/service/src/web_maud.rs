use keygate_client_core::AdGatewayProvider;
use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::notice::{Notice, notice_region};

pub const ROUTE_COUNTDOWN: &str = "/getkey/countdown";
pub const ROUTE_VERIFY_CAPTCHA: &str = "/getkey/verify";

const TURNSTILE_SCRIPT_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/api.js";
const FOOTER_LINK: &str = "https://theijon.online";
const CALCULATING_LABEL: &str = "Calculating...";

/// Per-response rendering inputs owned by the shell rather than the page.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub site_title: String,
    pub htmx_asset_path: String,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedRedirect {
    pub seconds: u64,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct UserView {
    pub username: String,
    pub avatar_url: String,
    pub initials: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardPanel {
    Captcha { prompt: &'static str },
    GetKey,
    Key {
        key: String,
        time_left: Option<String>,
        /// RFC 3339 expiry the in-page ticker counts down from.
        expires_at: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct DashboardView {
    pub panel: DashboardPanel,
    pub picker_open: bool,
    pub turnstile_site_key: String,
}

#[derive(Debug, Clone)]
pub enum WebBody {
    Home { signed_in: bool },
    Dashboard(DashboardView),
    CallbackError { message: String },
    Loading,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct WebPage {
    pub title: String,
    pub user: Option<UserView>,
    pub notices: Vec<Notice>,
    pub redirect: Option<TimedRedirect>,
    pub body: WebBody,
}

impl WebPage {
    pub fn new(title: impl Into<String>, body: WebBody) -> Self {
        Self {
            title: title.into(),
            user: None,
            notices: Vec::new(),
            redirect: None,
            body,
        }
    }

    pub fn with_user(mut self, user: Option<UserView>) -> Self {
        self.user = user;
        self
    }

    pub fn with_notices(mut self, notices: Vec<Notice>) -> Self {
        self.notices = notices;
        self
    }

    pub fn with_redirect(mut self, redirect: Option<TimedRedirect>) -> Self {
        self.redirect = redirect;
        self
    }
}

pub fn render_page(page: &WebPage, context: &RenderContext) -> String {
    let needs_turnstile = matches!(
        &page.body,
        WebBody::Dashboard(DashboardView {
            panel: DashboardPanel::Captcha { .. },
            ..
        })
    );

    let markup = html! {
        (DOCTYPE)
        html lang="en" class="dark" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="theme-color" content="#08090a";
                @if let Some(redirect) = &page.redirect {
                    meta http-equiv="refresh" content={ (redirect.seconds) ";url=" (redirect.location) };
                }
                title { (page.title) " | " (context.site_title) }
                style nonce=(context.nonce) { (PreEscaped(styles())) }
                script src=(context.htmx_asset_path) defer {}
                @if needs_turnstile {
                    script src=(TURNSTILE_SCRIPT_URL) async defer {}
                }
                script nonce=(context.nonce) { (PreEscaped(shell_script())) }
            }
            body {
                div class="kg-bg" aria-hidden="true" {}
                main id="main-content" class="kg-app" {
                    @if let Some(user) = &page.user {
                        (user_bar(user))
                    }
                    (render_body(page, context))
                }
                (notice_region(&page.notices))
            }
        }
    };

    markup.into_string()
}

/// Polled countdown label. Polling stops once no further update is expected.
pub fn render_countdown_fragment(label: Option<&str>, expires_at: Option<&str>) -> String {
    countdown_markup(label, expires_at).into_string()
}

fn countdown_markup(label: Option<&str>, expires_at: Option<&str>) -> Markup {
    let expired = label == Some(keygate_client_core::EXPIRED_LABEL);
    html! {
        @if expired {
            div id="kg-countdown" class="kg-countdown expired" { (keygate_client_core::EXPIRED_LABEL) }
        } @else {
            div id="kg-countdown" class="kg-countdown"
                data-expires-at=[expires_at]
                hx-get=(ROUTE_COUNTDOWN)
                hx-trigger="every 1s"
                hx-swap="outerHTML" {
                @match label {
                    Some(label) => { (label) }
                    None => { span class="kg-pulse" { (CALCULATING_LABEL) } }
                }
            }
        }
    }
}

/// Terminal countdown slot for visitors who may not see a key.
pub fn render_countdown_placeholder() -> String {
    html! {
        div id="kg-countdown" class="kg-countdown" {}
    }
    .into_string()
}

fn render_body(page: &WebPage, context: &RenderContext) -> Markup {
    match &page.body {
        WebBody::Home { signed_in } => home_panel(*signed_in, &context.site_title),
        WebBody::Dashboard(view) => dashboard_panel(view, &context.site_title),
        WebBody::CallbackError { message } => callback_error_panel(message),
        WebBody::Loading => loading_panel(),
        WebBody::NotFound => not_found_panel(),
    }
}

fn user_bar(user: &UserView) -> Markup {
    html! {
        nav class="kg-userbar" {
            div class="kg-user" {
                span class="kg-avatar" {
                    img src=(user.avatar_url) alt=(user.username) width="32" height="32";
                    span class="kg-avatar-fallback" aria-hidden="true" { (user.initials) }
                }
                span class="kg-username" { (user.username) }
            }
            form method="post" action="/logout" hx-post="/logout" {
                button type="submit" class="kg-btn danger round" title="Logout" {
                    span class="kg-icon" aria-hidden="true" { "⏻" }
                    span class="sr-only" { "Logout" }
                }
            }
        }
    }
}

fn home_panel(signed_in: bool, site_title: &str) -> Markup {
    html! {
        section class="kg-column" {
            (brand_header(site_title))
            article class="kg-card" {
                div class="kg-card-accent" {}
                @if signed_in {
                    p class="kg-muted" { "You are signed in." }
                    a class="kg-btn primary wide" href="/getkey" { "Go to Get Key" }
                } @else {
                    p class="kg-muted" { "Sign in with Discord to get your key." }
                    a class="kg-btn primary wide" href="/login" { "Login with Discord" }
                }
            }
            (footer())
        }
    }
}

fn dashboard_panel(view: &DashboardView, site_title: &str) -> Markup {
    html! {
        section class="kg-column" {
            (brand_header(site_title))
            div class="kg-card dashed kg-rules" {
                div { span class="kg-accent" { "◷" } " Key resets every week" }
                div { span class="kg-accent" { "✓" } " 1 Checkpoint per 8 hours (stackable)" }
            }
            article class="kg-card" {
                div class="kg-card-accent" {}
                @match &view.panel {
                    DashboardPanel::Captcha { prompt } => {
                        (captcha_panel(prompt, &view.turnstile_site_key))
                    }
                    DashboardPanel::GetKey => {
                        a class="kg-btn primary wide tall" href="/getkey?picker=open" {
                            span class="kg-icon" aria-hidden="true" { "⚿" } " Get Key"
                        }
                    }
                    DashboardPanel::Key { key, time_left, expires_at } => {
                        (key_panel(key, time_left.as_deref(), expires_at.as_deref()))
                    }
                }
            }
            (footer())
        }
        @if view.picker_open && !matches!(view.panel, DashboardPanel::Captcha { .. }) {
            (provider_picker())
        }
    }
}

fn captcha_panel(prompt: &str, site_key: &str) -> Markup {
    html! {
        form id="kg-captcha-form" class="kg-stack" method="post" action=(ROUTE_VERIFY_CAPTCHA) {
            div class="kg-captcha" {
                div class="cf-turnstile"
                    data-sitekey=(site_key)
                    data-theme="dark"
                    data-callback="keygateCaptchaSolved" {}
            }
            p class="kg-muted small" { (prompt) }
            noscript {
                button type="submit" class="kg-btn secondary" { "Continue" }
            }
        }
    }
}

fn key_panel(key: &str, time_left: Option<&str>, expires_at: Option<&str>) -> Markup {
    html! {
        div class="kg-stack center" {
            div class="kg-stack tight" {
                span class="kg-label" { "Time Remaining" }
                (countdown_markup(time_left, expires_at))
            }
            div id="kg-key" class="kg-key" { (key) }
            div class="kg-grid two" {
                button type="button" class="kg-btn primary" data-copy-target="kg-key" {
                    span class="kg-icon" aria-hidden="true" { "⧉" } " Copy Key"
                }
                a class="kg-btn secondary" href="/getkey?picker=open" {
                    span class="kg-icon" aria-hidden="true" { "+" } " Add Time"
                }
            }
        }
    }
}

fn provider_picker() -> Markup {
    html! {
        div class="kg-overlay" {
            div class="kg-dialog" role="dialog" aria-modal="true" aria-labelledby="kg-picker-title" {
                div class="kg-card-accent" {}
                a class="kg-close" href="/getkey" aria-label="Close" { "×" }
                h2 id="kg-picker-title" { "Select Provider" }
                p class="kg-muted center" { "Choose your preferred platform to generate a key" }
                div class="kg-stack" {
                    @for provider in AdGatewayProvider::ALL {
                        (provider_option(provider))
                    }
                }
            }
        }
    }
}

fn provider_option(provider: AdGatewayProvider) -> Markup {
    let action = format!("/getkey/provider/{}", provider.as_str());
    let tagline = match provider {
        AdGatewayProvider::LootLabs => "Highly Recommended",
        AdGatewayProvider::Linkvertise => "Fast Alternative",
    };
    html! {
        form method="post" action=(action) hx-post=(action) {
            button type="submit" class="kg-provider" {
                span class="kg-provider-logo" {
                    img src=(provider.logo_url()) alt=(provider.display_name()) width="24" height="24";
                }
                span class="kg-provider-text" {
                    strong { (provider.display_name()) }
                    small { (tagline) }
                }
                span class="kg-provider-go" aria-hidden="true" { "↗" }
                span class="htmx-indicator kg-muted small" { "Redirecting..." }
            }
        }
    }
}

fn callback_error_panel(message: &str) -> Markup {
    html! {
        section class="kg-card kg-error-card" {
            div class="kg-error-icon" aria-hidden="true" { "⊗" }
            h2 { "Error" }
            p class="kg-muted" { (message) }
        }
    }
}

fn loading_panel() -> Markup {
    html! {
        div class="kg-loading" {
            div class="kg-spinner" role="status" aria-label="Loading" {}
        }
    }
}

fn not_found_panel() -> Markup {
    html! {
        section class="kg-column center kg-not-found" {
            header {
                h1 class="kg-404" { "404" }
                h2 class="kg-accent" { "Lost in the Matrix?" }
            }
            p class="kg-muted" {
                "The page you're searching for seems to have vanished or never existed in this dimension."
            }
            a class="kg-btn outline" href="/" { "Return to Safety" }
        }
    }
}

fn brand_header(site_title: &str) -> Markup {
    html! {
        header class="kg-brand" {
            h1 { (site_title) }
        }
    }
}

fn footer() -> Markup {
    html! {
        footer class="kg-footer" {
            span { "Powered by" }
            a href=(FOOTER_LINK) target="_blank" rel="noopener noreferrer" { "The iJon" }
            span { "© 2025" }
        }
    }
}

fn shell_script() -> &'static str {
    r#"
function keygateNotice(level, message) {
  var region = document.getElementById('kg-notices');
  if (!region) { return; }
  var notice = document.createElement('div');
  notice.className = 'kg-notice ' + level;
  notice.textContent = message;
  region.appendChild(notice);
  setTimeout(function () { notice.remove(); }, 4000);
}
function keygateCaptchaSolved() {
  var form = document.getElementById('kg-captcha-form');
  if (form) { form.requestSubmit(); }
}
document.addEventListener('click', function (event) {
  var button = event.target.closest('[data-copy-target]');
  if (!button) { return; }
  var source = document.getElementById(button.getAttribute('data-copy-target'));
  if (!source || !navigator.clipboard) {
    keygateNotice('error', 'Could not copy the key.');
    return;
  }
  navigator.clipboard.writeText(source.textContent.trim()).then(
    function () { keygateNotice('success', 'Copied to clipboard!'); },
    function () { keygateNotice('error', 'Could not copy the key.'); }
  );
});
function keygateRemaining(expiresAt) {
  var diff = Date.parse(expiresAt) - Date.now();
  if (!(diff > 0)) { return 'Expired'; }
  var hours = Math.floor(diff / 3600000);
  var minutes = Math.floor((diff % 3600000) / 60000);
  var seconds = Math.floor((diff % 60000) / 1000);
  return hours + 'h ' + minutes + 'm ' + seconds + 's';
}
function keygateTick() {
  document.querySelectorAll('[data-expires-at]').forEach(function (slot) {
    var label = keygateRemaining(slot.getAttribute('data-expires-at'));
    slot.textContent = label;
    if (label === 'Expired') {
      slot.classList.add('expired');
      slot.removeAttribute('data-expires-at');
    }
  });
}
setInterval(keygateTick, 1000);
document.addEventListener('DOMContentLoaded', function () {
  document.querySelectorAll('#kg-notices .kg-notice').forEach(function (notice) {
    setTimeout(function () { notice.remove(); }, 5000);
  });
});
"#
}

fn styles() -> &'static str {
    r#"
:root {
  color-scheme: dark;
  --bg: #08090a;
  --panel: rgba(24, 24, 27, 0.6);
  --panel-solid: #18181b;
  --border: #27272a;
  --text: #fafafa;
  --muted: #a1a1aa;
  --faint: #52525b;
  --accent: #d4a76a;
  --accent-soft: rgba(212, 167, 106, 0.1);
  --danger: #ef4444;
  --success: #22c55e;
  --info: #38bdf8;
}
* { box-sizing: border-box; }
html, body { margin: 0; min-height: 100%; background: var(--bg); color: var(--text); }
body {
  font-family: "Geist", "Inter", -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif;
  -webkit-font-smoothing: antialiased;
}
::selection { background: rgba(212, 167, 106, 0.3); }
a { color: inherit; }
.sr-only { position: absolute; width: 1px; height: 1px; overflow: hidden; clip: rect(0 0 0 0); }
.kg-bg {
  position: fixed;
  inset: 0;
  pointer-events: none;
  background: radial-gradient(50vw 50vh at 0% 0%, rgba(212, 167, 106, 0.08), transparent 70%),
              radial-gradient(60vw 60vh at 100% 100%, rgba(212, 167, 106, 0.05), transparent 70%);
}
.kg-app { position: relative; z-index: 1; min-height: 100vh; display: flex; align-items: center; justify-content: center; padding: 2rem 1rem; }
.kg-column { width: 100%; max-width: 28rem; display: flex; flex-direction: column; align-items: center; gap: 2rem; }
.kg-column.center, .center { text-align: center; }
.kg-stack { display: flex; flex-direction: column; gap: 1rem; width: 100%; }
.kg-stack.center { align-items: center; }
.kg-stack.tight { gap: 0.5rem; }
.kg-grid.two { display: grid; grid-template-columns: repeat(2, minmax(0, 1fr)); gap: 0.75rem; width: 100%; }
.kg-brand h1 {
  margin: 1.5rem 0 0;
  font-size: clamp(2.25rem, 8vw, 5rem);
  font-weight: 600;
  letter-spacing: -0.02em;
  background: linear-gradient(180deg, #262626, var(--accent) 55%, var(--accent));
  -webkit-background-clip: text;
  background-clip: text;
  color: transparent;
}
.kg-card {
  position: relative;
  width: 100%;
  overflow: hidden;
  padding: 2rem 1.5rem 1.5rem;
  border: 1px solid var(--border);
  border-radius: 0.75rem;
  background: var(--panel);
  backdrop-filter: blur(16px);
  box-shadow: 0 25px 50px -12px rgba(0, 0, 0, 0.6);
}
.kg-card.dashed { border-style: dashed; padding: 1rem; color: var(--muted); font-size: 0.875rem; text-align: center; }
.kg-rules div { margin: 0.2rem 0; }
.kg-card-accent { position: absolute; top: 0; left: 0; width: 100%; height: 4px; opacity: 0.5; background: linear-gradient(90deg, var(--accent), rgba(212, 167, 106, 0.5), var(--accent)); }
.kg-accent { color: var(--accent); }
.kg-muted { color: var(--muted); }
.kg-muted.small, small { font-size: 0.8rem; color: var(--faint); }
.kg-label { font-size: 0.75rem; text-transform: uppercase; letter-spacing: 0.08em; color: var(--faint); }
.kg-countdown { font-family: ui-monospace, "Geist Mono", monospace; font-size: 1.25rem; color: #d4d4d8; min-height: 1.75rem; }
.kg-countdown.expired { color: var(--danger); }
.kg-pulse { animation: kg-pulse 1.5s ease-in-out infinite; }
.kg-key {
  width: 100%;
  padding: 1rem;
  border: 1px solid var(--border);
  border-radius: 0.75rem;
  background: #09090b;
  font-family: ui-monospace, "Geist Mono", monospace;
  font-size: 1.1rem;
  word-break: break-all;
  color: rgba(212, 167, 106, 0.7);
  user-select: all;
}
.kg-captcha { display: flex; justify-content: center; padding: 1rem; border: 1px solid rgba(39, 39, 42, 0.5); border-radius: 0.5rem; background: rgba(9, 9, 11, 0.5); min-height: 97px; }
.kg-btn {
  display: inline-flex;
  align-items: center;
  justify-content: center;
  gap: 0.5rem;
  min-height: 2.5rem;
  padding: 0 1rem;
  border: 1px solid transparent;
  border-radius: 0.5rem;
  font: inherit;
  font-weight: 500;
  text-decoration: none;
  cursor: pointer;
  transition: transform 120ms ease, background 120ms ease;
}
.kg-btn:active { transform: scale(0.97); }
.kg-btn.primary { background: var(--accent); color: #09090b; }
.kg-btn.primary:hover { background: rgba(212, 167, 106, 0.7); color: #fff; }
.kg-btn.secondary { background: #27272a; color: var(--text); }
.kg-btn.outline { border-color: rgba(212, 167, 106, 0.5); color: var(--accent); background: transparent; height: 3rem; padding: 0 2rem; font-size: 1.1rem; border-radius: 0.75rem; }
.kg-btn.outline:hover { background: var(--accent-soft); }
.kg-btn.danger { background: var(--danger); color: #fff; }
.kg-btn.round { width: 3rem; height: 3rem; border-radius: 999px; padding: 0; }
.kg-btn.wide { width: 100%; }
.kg-btn.tall { height: 3.5rem; font-size: 1.1rem; background: linear-gradient(90deg, var(--accent), rgba(212, 167, 106, 0.5)); }
.kg-userbar { position: fixed; top: 1rem; right: 1rem; z-index: 20; display: flex; align-items: center; gap: 0.75rem; }
.kg-userbar form { margin: 0; }
.kg-user { display: flex; align-items: center; gap: 0.75rem; padding: 0.5rem 1rem; border: 1px solid var(--border); border-radius: 999px; background: rgba(24, 24, 27, 0.8); }
.kg-avatar { position: relative; display: inline-flex; width: 2rem; height: 2rem; border-radius: 999px; overflow: hidden; background: #27272a; }
.kg-avatar img { position: relative; z-index: 1; width: 100%; height: 100%; object-fit: cover; }
.kg-avatar-fallback { position: absolute; inset: 0; display: flex; align-items: center; justify-content: center; font-size: 0.7rem; }
.kg-username { font-size: 0.875rem; color: #e4e4e7; }
.kg-overlay { position: fixed; inset: 0; z-index: 30; display: flex; align-items: center; justify-content: center; padding: 1rem; background: rgba(0, 0, 0, 0.7); }
.kg-dialog { position: relative; width: 100%; max-width: 26.5rem; overflow: hidden; padding: 1.75rem 1.5rem 1.5rem; border: 1px solid #3f3f46; border-radius: 0.75rem; background: var(--panel-solid); }
.kg-dialog h2 { margin: 0 0 0.25rem; text-align: center; font-size: 1.5rem; }
.kg-dialog form { margin: 0; }
.kg-close { position: absolute; top: 0.75rem; right: 1rem; text-decoration: none; color: var(--muted); font-size: 1.25rem; }
.kg-provider { display: flex; align-items: center; gap: 1rem; width: 100%; height: 4rem; padding: 0 1rem; border: 1px solid var(--border); border-radius: 0.5rem; background: #1a1a1a; color: var(--text); font: inherit; cursor: pointer; text-align: left; }
.kg-provider:hover { background: #252525; }
.kg-provider-logo { display: flex; align-items: center; justify-content: center; width: 2.5rem; height: 2.5rem; border-radius: 0.75rem; background: var(--accent-soft); }
.kg-provider-text { display: flex; flex-direction: column; }
.kg-provider-text strong { font-size: 1.1rem; color: #e4e4e7; }
.kg-provider-go { margin-left: auto; color: var(--faint); }
.kg-error-card { max-width: 28rem; text-align: center; }
.kg-error-card h2 { margin: 0 0 0.5rem; }
.kg-error-icon { font-size: 3.5rem; color: var(--danger); line-height: 1; margin-bottom: 1rem; }
.kg-loading { display: flex; align-items: center; justify-content: center; min-height: 60vh; }
.kg-spinner { width: 3.25rem; height: 3.25rem; border: 3px solid #27272a; border-top-color: var(--accent); border-radius: 999px; animation: kg-spin 0.8s linear infinite; }
.kg-404 { margin: 0; font-size: 6rem; font-weight: 900; color: #27272a; animation: kg-pulse 2s ease-in-out infinite; }
.kg-not-found h2 { margin: 0; font-size: 2.25rem; }
.kg-not-found p { max-width: 24rem; font-size: 1.1rem; }
.kg-footer { display: flex; align-items: center; gap: 0.5rem; font-size: 0.75rem; color: var(--faint); }
.kg-footer a { color: var(--muted); font-weight: 600; text-decoration: none; }
.kg-footer a:hover { color: var(--accent); text-decoration: underline; }
.kg-notices { position: fixed; right: 1rem; bottom: 1rem; z-index: 40; display: flex; flex-direction: column; gap: 0.5rem; max-width: 22rem; }
.kg-notice { padding: 0.75rem 1rem; border: 1px solid var(--border); border-left-width: 4px; border-radius: 0.5rem; background: var(--panel-solid); font-size: 0.875rem; box-shadow: 0 10px 25px rgba(0, 0, 0, 0.5); }
.kg-notice.success { border-left-color: var(--success); }
.kg-notice.error { border-left-color: var(--danger); }
.kg-notice.info { border-left-color: var(--info); }
.htmx-indicator { display: none; }
.htmx-request .htmx-indicator, .htmx-request.htmx-indicator { display: inline; }
@keyframes kg-spin { to { transform: rotate(360deg); } }
@keyframes kg-pulse { 50% { opacity: 0.5; } }
@media (max-width: 640px) {
  .kg-grid.two { grid-template-columns: 1fr; }
  .kg-username { display: none; }
}
"#
}
