use chrono::{DateTime, Duration, Utc};
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::{get_cookie, hash_password, redirect, redirect_with_flash, validate_uuid, verify_password};
use crate::core::query_params::{get_string, parse_body};
use crate::core::store::Transaction;
use crate::forms::{normalize_email, validate_forgot_password, validate_login, validate_registration, validate_reset_password};
use crate::handlers::RequestCtx;
use crate::models::models::{SessionData, User};
use crate::tokens::{sign_reset_token, verify_reset_token};
use crate::templates;
use crate::users::{email_taken, find_by_email, find_by_username, get_user, insert_user, save_user, username_taken};

pub const SESSION_COOKIE: &str = "session";

// === Identity ===

/// Create an account. Username and email must both be unused.
pub fn register(tx: &Transaction, username: &str, email: &str, password: &str, now: DateTime<Utc>) -> AppResult<User> {
    let email = normalize_email(email);
    if username_taken(tx, username)? {
        return Err(AppError::DuplicateIdentity { field: "username" });
    }
    if email_taken(tx, &email)? {
        return Err(AppError::DuplicateIdentity { field: "email" });
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email,
        password_hash: hash_password(password)?,
        bio: None,
        created_at: now,
        last_seen: now,
    };
    insert_user(tx, &user)?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Unknown usernames and wrong passwords fail the same way.
pub fn authenticate(tx: &Transaction, username: &str, password: &str) -> AppResult<User> {
    match find_by_username(tx, username)? {
        Some(user) if verify_password(password, &user.password_hash) => Ok(user),
        _ => Err(AppError::InvalidCredentials),
    }
}

pub fn set_password(tx: &Transaction, user: &mut User, new_password: &str) -> AppResult<()> {
    user.password_hash = hash_password(new_password)?;
    save_user(tx, user)?;
    Ok(())
}

pub fn issue_reset_token(config: &Config, user: &User, now: DateTime<Utc>) -> String {
    sign_reset_token(
        &config.secret_key,
        &user.id,
        Duration::seconds(config.reset_token_seconds),
        now,
    )
}

pub fn redeem_reset_token(tx: &Transaction, config: &Config, token: &str, now: DateTime<Utc>) -> AppResult<User> {
    let user_id = verify_reset_token(&config.secret_key, token, now).map_err(|err| {
        tracing::debug!(?err, "reset token rejected");
        AppError::InvalidOrExpiredToken
    })?;
    get_user(tx, &user_id)?.ok_or(AppError::InvalidOrExpiredToken)
}

// === Sessions ===

pub fn start_session(tx: &Transaction, user_id: &str, now: DateTime<Utc>) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = SessionData {
        user_id: user_id.to_string(),
        created_at: now,
    };
    tx.set_json(&session_key(&token), &data)?;
    Ok(token)
}

pub fn end_session(tx: &Transaction, token: &str) {
    tx.delete(&session_key(token));
}

/// Resolve a session token to its user. Expired sessions are removed.
pub fn session_user(tx: &Transaction, config: &Config, token: &str, now: DateTime<Utc>) -> anyhow::Result<Option<User>> {
    let Some(data) = tx.get_json::<SessionData>(&session_key(token))? else {
        return Ok(None);
    };
    if now - data.created_at > Duration::hours(config.session_hours) {
        end_session(tx, token);
        return Ok(None);
    }
    get_user(tx, &data.user_id)
}

/// The session token carried by the request, from the cookie or a bearer header.
pub fn request_token(req: &Request) -> Option<String> {
    let token = match get_cookie(req, SESSION_COOKIE) {
        Some(token) => token,
        None => req
            .header("authorization")?
            .as_str()?
            .strip_prefix("Bearer ")?
            .trim()
            .to_string(),
    };
    validate_uuid(&token).then_some(token)
}

fn session_cookie(token: &str, max_age_secs: Option<i64>) -> String {
    match max_age_secs {
        Some(age) => format!("{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}", SESSION_COOKIE, token, age),
        None => format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token),
    }
}

/// Only same-site paths are accepted as a post-login destination.
fn safe_next(next: Option<String>) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/feed".to_string(),
    }
}

// === HTTP Handlers ===

pub fn register_page(rc: &RequestCtx) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    Ok(rc.render(200, "Register", &templates::register_form("", "", &[])))
}

pub fn submit_register(rc: &RequestCtx) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    let fields = parse_body(rc.req);
    let outcome = validate_registration(&fields)
        .map_err(AppError::ValidationFailed)
        .and_then(|reg| register(rc.tx, &reg.username, &reg.email, &reg.password, rc.now));

    match outcome {
        Ok(_) => Ok(redirect_with_flash(
            "/login",
            "Congratulations, you are now a registered user!",
        )),
        Err(err) if err.is_recoverable() => {
            let username = fields.get("username").map(|s| s.as_str()).unwrap_or_default();
            let email = fields.get("email").map(|s| s.as_str()).unwrap_or_default();
            let content = templates::register_form(username, email, &[err.user_message()]);
            Ok(rc.render(err.status_code().as_u16(), "Register", &content))
        }
        Err(err) => Err(err),
    }
}

pub fn login_page(rc: &RequestCtx) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    Ok(rc.render(200, "Sign In", &templates::login_form(rc.target(), "", &[])))
}

pub fn submit_login(rc: &RequestCtx) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    let fields = parse_body(rc.req);
    let outcome = validate_login(&fields)
        .map_err(AppError::ValidationFailed)
        .and_then(|login| {
            authenticate(rc.tx, &login.username, &login.password).map(|user| (user, login.remember_me))
        });

    match outcome {
        Ok((user, remember_me)) => {
            let token = start_session(rc.tx, &user.id, rc.now)?;
            let max_age = remember_me.then(|| rc.app.config.session_hours * 3600);
            let next = safe_next(get_string(&rc.query(), "next", None));
            tracing::info!(user_id = %user.id, username = %user.username, "login");

            Ok(Response::builder()
                .status(303)
                .header("location", next)
                .header("set-cookie", session_cookie(&token, max_age))
                .body(Vec::new())
                .build())
        }
        Err(err) if err.is_recoverable() => {
            if matches!(err, AppError::InvalidCredentials) {
                tracing::warn!("failed login attempt");
            }
            let username = fields.get("username").map(|s| s.as_str()).unwrap_or_default();
            let content = templates::login_form(rc.target(), username, &[err.user_message()]);
            Ok(rc.render(err.status_code().as_u16(), "Sign In", &content))
        }
        Err(err) => Err(err),
    }
}

pub fn logout(rc: &RequestCtx) -> AppResult<Response> {
    rc.require_user()?;
    if let Some(token) = request_token(rc.req) {
        end_session(rc.tx, &token);
    }
    Ok(Response::builder()
        .status(303)
        .header("location", "/login")
        .header("set-cookie", format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE))
        .body(Vec::new())
        .build())
}

pub fn forgot_password_page(rc: &RequestCtx) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    Ok(rc.render(200, "Forgot my password", &templates::forgot_password_form(&[])))
}

pub fn submit_forgot_password(rc: &RequestCtx) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    let email = match validate_forgot_password(&parse_body(rc.req)) {
        Ok(email) => email,
        Err(errors) => {
            let err = AppError::ValidationFailed(errors);
            let content = templates::forgot_password_form(&[err.user_message()]);
            return Ok(rc.render(400, "Forgot my password", &content));
        }
    };

    // Same answer whether or not the address is known
    if let Some(user) = find_by_email(rc.tx, &email)? {
        let token = issue_reset_token(&rc.app.config, &user, rc.now);
        let reset_url = format!("{}/reset_password/{}", rc.app.config.base_url, token);
        rc.app.mailer.send_password_reset(&user, &reset_url)?;
    }

    Ok(redirect_with_flash(
        "/login",
        "Check your email for the instructions to reset your password.",
    ))
}

pub fn reset_password_page(rc: &RequestCtx, token: &str) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    if let Err(err) = redeem_reset_token(rc.tx, &rc.app.config, token, rc.now) {
        return Ok(redirect_with_flash("/forgot_password", &err.user_message()));
    }
    Ok(rc.render(200, "Reset Password", &templates::reset_password_form(token, &[])))
}

pub fn submit_reset_password(rc: &RequestCtx, token: &str) -> AppResult<Response> {
    if rc.user.is_some() {
        return Ok(redirect("/feed"));
    }
    let mut user = match redeem_reset_token(rc.tx, &rc.app.config, token, rc.now) {
        Ok(user) => user,
        Err(err) => return Ok(redirect_with_flash("/forgot_password", &err.user_message())),
    };

    match validate_reset_password(&parse_body(rc.req)) {
        Ok(password) => {
            set_password(rc.tx, &mut user, &password)?;
            tracing::info!(user_id = %user.id, "password reset");
            Ok(redirect_with_flash("/login", "Your password has been reset."))
        }
        Err(errors) => {
            let err = AppError::ValidationFailed(errors);
            let content = templates::reset_password_form(token, &[err.user_message()]);
            Ok(rc.render(400, "Reset Password", &content))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    fn config() -> Config {
        Config {
            secret_key: b"unit-test-secret".to_vec(),
            ..Config::default()
        }
    }

    #[test]
    fn duplicate_username_is_rejected_and_first_account_kept() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let first = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        let err = register(&tx, "alice", "other@example.com", "secret2", Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity { field: "username" }));

        let kept = find_by_username(&tx, "alice").unwrap().unwrap();
        assert_eq!(kept, first);
        assert!(find_by_email(&tx, "other@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        register(&tx, "alice", "shared@example.com", "secret1", Utc::now()).unwrap();

        let err = register(&tx, "bob", "shared@example.com", "secret1", Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity { field: "email" }));
        assert!(find_by_username(&tx, "bob").unwrap().is_none());
    }

    #[test]
    fn email_uniqueness_ignores_case_and_whitespace() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        let err = register(&tx, "bob", " Alice@Example.com ", "secret1", Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity { field: "email" }));
        assert!(find_by_username(&tx, "bob").unwrap().is_none());

        let carol = register(&tx, "carol", "Carol@Example.COM", "secret1", Utc::now()).unwrap();
        assert_eq!(carol.email, "carol@example.com");
        assert_eq!(find_by_email(&tx, "ALICE@example.com").unwrap().unwrap().id, alice.id);
    }

    #[test]
    fn password_is_never_stored_in_plaintext() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let user = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();
        assert!(!user.password_hash.contains("secret1"));
    }

    #[test]
    fn authentication_failures_look_the_same() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        assert_eq!(authenticate(&tx, "alice", "secret1").unwrap().id, alice.id);
        let wrong = authenticate(&tx, "alice", "nope").unwrap_err();
        let unknown = authenticate(&tx, "mallory", "secret1").unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert!(matches!(wrong, AppError::InvalidCredentials));
    }

    #[test]
    fn reset_token_round_trip_and_expiry() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let config = config();
        let now = Utc::now();
        let alice = register(&tx, "alice", "alice@example.com", "secret1", now).unwrap();

        let token = issue_reset_token(&config, &alice, now);
        assert_eq!(redeem_reset_token(&tx, &config, &token, now).unwrap().id, alice.id);

        let later = now + Duration::seconds(config.reset_token_seconds + 1);
        assert!(matches!(
            redeem_reset_token(&tx, &config, &token, later),
            Err(AppError::InvalidOrExpiredToken)
        ));
        assert!(matches!(
            redeem_reset_token(&tx, &config, "garbage", now),
            Err(AppError::InvalidOrExpiredToken)
        ));
    }

    #[test]
    fn reset_token_for_unknown_user_is_rejected() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let config = config();
        let now = Utc::now();
        let ghost = User {
            id: Uuid::new_v4().to_string(),
            username: "ghost".to_string(),
            email: "ghost@example.com".to_string(),
            password_hash: String::new(),
            bio: None,
            created_at: now,
            last_seen: now,
        };
        let token = issue_reset_token(&config, &ghost, now);
        assert!(matches!(
            redeem_reset_token(&tx, &config, &token, now),
            Err(AppError::InvalidOrExpiredToken)
        ));
    }

    #[test]
    fn set_password_replaces_the_hash() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let mut alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        set_password(&tx, &mut alice, "brand-new").unwrap();
        assert!(authenticate(&tx, "alice", "secret1").is_err());
        assert!(authenticate(&tx, "alice", "brand-new").is_ok());
    }

    #[test]
    fn sessions_expire() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let config = config();
        let now = Utc::now();
        let alice = register(&tx, "alice", "alice@example.com", "secret1", now).unwrap();

        let token = start_session(&tx, &alice.id, now).unwrap();
        assert_eq!(session_user(&tx, &config, &token, now).unwrap().unwrap().id, alice.id);

        let later = now + Duration::hours(config.session_hours + 1);
        assert!(session_user(&tx, &config, &token, later).unwrap().is_none());
        assert!(tx.get(&session_key(&token)).unwrap().is_none());
    }

    #[test]
    fn next_must_stay_on_site() {
        assert_eq!(safe_next(Some("/explore?page=2".to_string())), "/explore?page=2");
        assert_eq!(safe_next(Some("https://evil.example".to_string())), "/feed");
        assert_eq!(safe_next(Some("//evil.example".to_string())), "/feed");
        assert_eq!(safe_next(None), "/feed");
    }

    #[test]
    fn bearer_header_is_accepted() {
        let token = Uuid::new_v4().to_string();
        let req = Request::builder()
            .method(spin_sdk::http::Method::Get)
            .uri("/feed")
            .header("authorization", format!("Bearer {}", token))
            .body(Vec::new())
            .build();
        assert_eq!(request_token(&req), Some(token));
    }

    #[test]
    fn tokens_that_are_not_uuids_are_ignored() {
        let req = Request::builder()
            .method(spin_sdk::http::Method::Get)
            .uri("/feed")
            .header("cookie", "session=not-a-token")
            .body(Vec::new())
            .build();
        assert_eq!(request_token(&req), None);
    }
}
