use std::collections::HashMap;

use chrono::{DateTime, Utc};
use spin_sdk::http::{Method, Request, Response};

use crate::app::AppContext;
use crate::auth;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::{get_cookie, now, redirect, FLASH_COOKIE};
use crate::core::query_params::parse_query_params;
use crate::core::static_server::serve_static;
use crate::core::store::{CommitError, Transaction};
use crate::follow;
use crate::models::models::User;
use crate::posts;
use crate::templates;
use crate::users;

/// Per-request view handed to every handler.
pub struct RequestCtx<'a> {
    pub app: &'a AppContext,
    pub tx: &'a Transaction<'a>,
    pub req: &'a Request,
    pub user: Option<User>,
    pub now: DateTime<Utc>,
}

impl RequestCtx<'_> {
    pub fn require_user(&self) -> AppResult<&User> {
        self.user.as_ref().ok_or(AppError::Unauthenticated)
    }

    /// Origin-form target (`/path?query`), even when the host passed an
    /// absolute URI.
    pub fn target(&self) -> &str {
        request_target(self.req)
    }

    pub fn query(&self) -> HashMap<String, String> {
        parse_query_params(self.target())
    }

    /// Render a full page, consuming any pending flash notice.
    pub fn render(&self, status: u16, title: &str, content: &str) -> Response {
        let flash = get_cookie(self.req, FLASH_COOKIE)
            .map(|raw| urlencoding::decode(&raw).map(|s| s.into_owned()).unwrap_or(raw));
        let html = templates::layout(title, self.user.as_ref(), flash.as_deref(), content);

        let mut builder = Response::builder();
        builder
            .status(status)
            .header("content-type", "text/html; charset=utf-8");
        if flash.is_some() {
            builder.header("set-cookie", format!("{}=; Path=/; Max-Age=0", FLASH_COOKIE));
        }
        builder.body(html.into_bytes()).build()
    }
}

/// Resolve the session and bump last-seen in its own small transaction,
/// so page reads never contend with that write.
fn current_user(ctx: &AppContext, req: &Request, now: DateTime<Utc>) -> Option<User> {
    let token = auth::request_token(req)?;
    let tx = ctx.begin();

    let resolved = auth::session_user(&tx, &ctx.config, &token, now).and_then(|user| match user {
        Some(mut user) => {
            users::touch_last_seen(&tx, &mut user, now)?;
            Ok(Some(user))
        }
        None => Ok(None),
    });

    match resolved {
        Ok(user) => {
            if let Err(err) = tx.commit() {
                tracing::warn!(?err, "could not record last seen");
            }
            user
        }
        Err(err) => {
            tracing::error!(error = ?err, "session lookup failed");
            None
        }
    }
}

fn request_target(req: &Request) -> &str {
    req.path_and_query().unwrap_or("/")
}

fn path_param(path: &str, prefix: &str) -> Option<String> {
    let raw = path.strip_prefix(prefix)?;
    if raw.is_empty() || raw.contains('/') {
        return None;
    }
    urlencoding::decode(raw).ok().map(|s| s.into_owned())
}

fn dispatch(rc: &RequestCtx) -> AppResult<Response> {
    let path = rc.req.path();

    match (rc.req.method(), path) {
        (Method::Get, "/") | (Method::Get, "/index") => {
            if rc.user.is_some() {
                return Ok(redirect("/feed"));
            }
            Ok(rc.render(200, "Home", &templates::landing()))
        }
        (Method::Get, "/register") => auth::register_page(rc),
        (Method::Post, "/register") => auth::submit_register(rc),
        (Method::Get, "/login") => auth::login_page(rc),
        (Method::Post, "/login") => auth::submit_login(rc),
        (Method::Get, "/logout") => auth::logout(rc),
        (Method::Get, "/forgot_password") => auth::forgot_password_page(rc),
        (Method::Post, "/forgot_password") => auth::submit_forgot_password(rc),
        (Method::Get, "/feed") => posts::feed_page(rc),
        (Method::Post, "/feed") => posts::submit_post(rc),
        (Method::Get, "/explore") => posts::explore_page(rc),
        (Method::Get, "/edit_profile") => users::edit_profile_page(rc),
        (Method::Post, "/edit_profile") => users::submit_edit_profile(rc),
        (Method::Get, p) if p.starts_with("/static/") => serve_static(p),
        (method, p) => {
            if let Some(token) = path_param(p, "/reset_password/") {
                return match method {
                    Method::Get => auth::reset_password_page(rc, &token),
                    Method::Post => auth::submit_reset_password(rc, &token),
                    _ => Err(AppError::not_found("Page", p)),
                };
            }
            if !matches!(method, Method::Get) {
                return Err(AppError::not_found("Page", p));
            }
            if let Some(username) = path_param(p, "/user/") {
                return users::show_profile(rc, &username);
            }
            if let Some(username) = path_param(p, "/follow/") {
                return follow::handle_follow(rc, &username);
            }
            if let Some(username) = path_param(p, "/unfollow/") {
                return follow::handle_unfollow(rc, &username);
            }
            Err(AppError::not_found("Page", p))
        }
    }
}

/// Handle one request as a single transaction: commit on success, roll
/// back (drop) on error.
pub fn route(ctx: &AppContext, req: Request) -> Response {
    let now = now();
    let user = current_user(ctx, &req, now);
    let tx = ctx.begin();

    let result = {
        let rc = RequestCtx { app: ctx, tx: &tx, req: &req, user, now };
        dispatch(&rc)
    };

    match result {
        Ok(response) => match tx.commit() {
            Ok(()) => response,
            Err(CommitError::Conflict(key)) => {
                tracing::warn!(%key, path = %req.path(), "transaction conflict");
                AppError::Conflict.into()
            }
            Err(CommitError::Store(err)) => AppError::Internal(err).into(),
        },
        Err(AppError::Unauthenticated) => {
            let next = urlencoding::encode(request_target(&req)).into_owned();
            redirect(&format!("/login?next={}", next))
        }
        Err(err) => {
            if err.is_recoverable() {
                tracing::debug!(error = %err, path = %req.path(), "request rejected");
            }
            err.into()
        }
    }
}
