use ammonia::Builder;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

pub const FLASH_COOKIE: &str = "flash";

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn validate_uuid(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

/// 303 See Other, the answer to every successful form POST.
pub fn redirect(location: &str) -> Response {
    Response::builder()
        .status(303)
        .header("location", location)
        .body(Vec::new())
        .build()
}

/// Redirect and leave a one-shot notice for the next rendered page.
pub fn redirect_with_flash(location: &str, message: &str) -> Response {
    Response::builder()
        .status(303)
        .header("location", location)
        .header(
            "set-cookie",
            format!(
                "{}={}; Path=/; HttpOnly; SameSite=Lax",
                FLASH_COOKIE,
                urlencoding::encode(message)
            ),
        )
        .body(Vec::new())
        .build()
}

pub fn get_cookie(req: &Request, name: &str) -> Option<String> {
    let header = req.header("cookie")?.as_str()?;
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

/// Strip every HTML tag, leaving plain text. Output is unescaped again so
/// stored text is escaped exactly once, at render time.
pub fn sanitize_text(text: &str) -> String {
    let cleaned = Builder::default()
        .tags(std::collections::HashSet::new())
        .clean(text)
        .to_string();
    html_escape::decode_html_entities(&cleaned).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = hash_password("secret").unwrap();
        let b = hash_password("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn cookies_are_found_by_name() {
        let req = Request::builder()
            .method(spin_sdk::http::Method::Get)
            .uri("/feed")
            .header("cookie", "theme=dark; session=abc123; flash=")
            .body(Vec::new())
            .build();
        assert_eq!(get_cookie(&req, "session"), Some("abc123".to_string()));
        assert_eq!(get_cookie(&req, "flash"), None);
        assert_eq!(get_cookie(&req, "missing"), None);
    }

    #[test]
    fn flash_redirect_sets_cookie() {
        let resp = redirect_with_flash("/feed", "You are following bob");
        assert_eq!(*resp.status(), 303);
        let cookie = resp.header("set-cookie").and_then(|h| h.as_str()).unwrap();
        assert!(cookie.starts_with("flash=You%20are%20following%20bob;"));
    }

    #[test]
    fn sanitize_strips_tags() {
        assert_eq!(sanitize_text("<b>hi</b> there"), "hi there");
        assert_eq!(sanitize_text("<script>alert(1)</script>ok"), "ok");
        assert_eq!(sanitize_text("a < b & c"), "a < b & c");
    }
}
