use rand::RngCore;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MAX_EMAIL_LENGTH: usize = 120;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_BIO_LENGTH: usize = 140;
pub const MAX_POST_LENGTH: usize = 280;

pub const POSTS_LIST_KEY: &str = "posts_list";
pub const POST_SEQ_KEY: &str = "post_seq";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email)
}

pub fn post_key(id: u64) -> String {
    format!("post:{}", id)
}

pub fn followings_key(user_id: &str) -> String {
    format!("followings:{}", user_id)
}

pub fn followers_key(user_id: &str) -> String {
    format!("followers:{}", user_id)
}

pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

/// Runtime settings, read once from `CODR_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub secret_key: Vec<u8>,
    pub base_url: String,
    pub bind_addr: String,
    pub posts_per_page: usize,
    pub session_hours: i64,
    pub reset_token_seconds: i64,
    pub seed_demo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_key: random_secret(),
            base_url: "http://127.0.0.1:3000".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            posts_per_page: 10,
            session_hours: 24,
            reset_token_seconds: 600,
            seed_demo: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secret_key = match std::env::var("CODR_SECRET_KEY") {
            Ok(key) if !key.is_empty() => key.into_bytes(),
            _ => {
                tracing::warn!("CODR_SECRET_KEY not set, reset tokens will not survive a restart");
                defaults.secret_key
            }
        };

        Self {
            secret_key,
            base_url: env_or("CODR_BASE_URL", defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            bind_addr: env_or("CODR_BIND", defaults.bind_addr),
            posts_per_page: env_parse("CODR_POSTS_PER_PAGE", defaults.posts_per_page).max(1),
            session_hours: env_parse("CODR_SESSION_HOURS", defaults.session_hours),
            reset_token_seconds: env_parse("CODR_RESET_TOKEN_SECONDS", defaults.reset_token_seconds),
            seed_demo: env_parse("CODR_SEED_DEMO", defaults.seed_demo),
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(user_key("abc"), "user:abc");
        assert_eq!(post_key(7), "post:7");
        assert_eq!(followings_key("abc"), "followings:abc");
        assert_eq!(followers_key("abc"), "followers:abc");
    }

    #[test]
    fn default_secret_is_random() {
        let a = Config::default();
        let b = Config::default();
        assert_eq!(a.secret_key.len(), 32);
        assert_ne!(a.secret_key, b.secret_key);
    }
}
