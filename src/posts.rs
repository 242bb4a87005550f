use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use html_escape::encode_double_quoted_attribute;
use regex::Regex;
use spin_sdk::http::Response;

use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::redirect;
use crate::core::query_params::{get_int, parse_body};
use crate::core::store::Transaction;
use crate::feed::{explore, feed_for};
use crate::forms::validate_post;
use crate::handlers::RequestCtx;
use crate::models::models::Post;
use crate::templates;

/// Ids come from an atomic store counter, so concurrent posts never share one.
fn next_post_id(tx: &Transaction) -> anyhow::Result<u64> {
    tx.increment(POST_SEQ_KEY)
}

/// Store a post as given. Callers are responsible for validating `body`.
pub fn insert_post(tx: &Transaction, user_id: &str, body: &str, created_at: DateTime<Utc>) -> anyhow::Result<Post> {
    let post = Post {
        id: next_post_id(tx)?,
        user_id: user_id.to_string(),
        body: body.to_string(),
        created_at,
    };
    tx.set_json(&post_key(post.id), &post)?;

    let mut ids: Vec<u64> = tx.get_json(POSTS_LIST_KEY)?.unwrap_or_default();
    ids.insert(0, post.id); // prepend newest
    tx.set_json(POSTS_LIST_KEY, &ids)?;

    Ok(post)
}

pub fn create_post(tx: &Transaction, user_id: &str, body: &str, now: DateTime<Utc>) -> AppResult<Post> {
    let body = body.trim();
    let len = body.chars().count();
    if len == 0 || len > MAX_POST_LENGTH {
        return Err(AppError::invalid(
            "post",
            format!("Posts must be 1-{} characters", MAX_POST_LENGTH),
        ));
    }
    Ok(insert_post(tx, user_id, body, now)?)
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<>]+").expect("Regex should compile"))
}

/// Escape a stored body for HTML and turn bare URLs into links.
pub fn render_body(body: &str) -> String {
    let escaped = html_escape::encode_text(body).to_string();
    url_regex()
        .replace_all(&escaped, |caps: &regex::Captures| {
            let url = html_escape::decode_html_entities(&caps[0]).to_string();
            format!(
                r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
                encode_double_quoted_attribute(&url),
                &caps[0]
            )
        })
        .to_string()
}

// === HTTP Handlers ===

pub fn feed_page(rc: &RequestCtx) -> AppResult<Response> {
    render_feed(rc, 200, "", &[])
}

fn render_feed(rc: &RequestCtx, status: u16, draft: &str, errors: &[String]) -> AppResult<Response> {
    let user = rc.require_user()?;
    let page = get_int(&rc.query(), "page", 1);
    let posts = feed_for(rc.tx, &user.id, page, rc.app.config.posts_per_page)?;
    let content = templates::feed(&posts, draft, errors);
    Ok(rc.render(status, "Feed", &content))
}

pub fn submit_post(rc: &RequestCtx) -> AppResult<Response> {
    let user = rc.require_user()?;
    let fields = parse_body(rc.req);

    let outcome = validate_post(&fields)
        .map_err(AppError::ValidationFailed)
        .and_then(|body| create_post(rc.tx, &user.id, &body, rc.now));

    match outcome {
        Ok(post) => {
            tracing::info!(post_id = post.id, author = %user.username, "post created");
            Ok(redirect("/feed"))
        }
        Err(err) if err.is_recoverable() => {
            let draft = fields.get("post").map(|s| s.as_str()).unwrap_or_default();
            render_feed(rc, err.status_code().as_u16(), draft, &[err.user_message()])
        }
        Err(err) => Err(err),
    }
}

pub fn explore_page(rc: &RequestCtx) -> AppResult<Response> {
    rc.require_user()?;
    let page = get_int(&rc.query(), "page", 1);
    let posts = explore(rc.tx, page, rc.app.config.posts_per_page)?;
    Ok(rc.render(200, "Explore", &templates::explore(&posts)))
}
