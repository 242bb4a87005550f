use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use rust_embed::RustEmbed;
use spin_sdk::http::Response;

use crate::models::models::{Page, PostView, User};
use crate::posts::render_body;

#[derive(RustEmbed)]
#[folder = "static"]
pub struct Assets;

const FALLBACK_LAYOUT: &str = "<!DOCTYPE html><html><head><title>PAGE_TITLE</title></head>\
<body><nav>PAGE_NAV</nav>PAGE_FLASH PAGE_CONTENT</body></html>";

/// Wrap page content in the shared layout.
pub fn layout(title: &str, user: Option<&User>, flash: Option<&str>, content: &str) -> String {
    let template = Assets::get("layout.html")
        .and_then(|file| String::from_utf8(file.data.to_vec()).ok())
        .unwrap_or_else(|| FALLBACK_LAYOUT.to_string());

    let nav = match user {
        Some(user) => format!(
            r#"<a href="/feed">Feed</a> <a href="/explore">Explore</a> <a href="/user/{}">Profile</a> <a href="/logout">Logout</a>"#,
            attr(&urlencoding::encode(&user.username))
        ),
        None => r#"<a href="/login">Login</a> <a href="/register">Register</a>"#.to_string(),
    };
    let flash = flash
        .map(|msg| format!(r#"<div class="flash">{}</div>"#, text(msg)))
        .unwrap_or_default();

    fill(
        &template,
        &[
            ("PAGE_TITLE", &*text(title)),
            ("PAGE_NAV", nav.as_str()),
            ("PAGE_FLASH", flash.as_str()),
            ("PAGE_CONTENT", content),
        ],
    )
}

/// Substitute placeholders in one left-to-right pass. Inserted values are
/// never scanned again.
fn fill(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = slots
            .iter()
            .filter_map(|(name, value)| rest.find(name).map(|at| (at, *name, *value)))
            .min_by_key(|(at, _, _)| *at);
        match next {
            Some((at, name, value)) => {
                out.push_str(&rest[..at]);
                out.push_str(value);
                rest = &rest[at + name.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

pub fn html_response(status: u16, html: String) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/html; charset=utf-8")
        .body(html.into_bytes())
        .build()
}

pub fn render_error(status: u16, message: &str) -> Response {
    let heading = match status {
        404 => "File Not Found",
        500..=599 => "An unexpected error has occurred",
        _ => "Something went wrong",
    };
    let content = format!(
        r#"<h1>{}</h1><p>{}</p><p><a href="/">Back</a></p>"#,
        text(heading),
        text(message)
    );
    html_response(status, layout(heading, None, None, &content))
}

fn error_list(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let items: String = errors
        .iter()
        .map(|e| format!("<li>{}</li>", text(e)))
        .collect();
    format!(r#"<ul class="errors">{}</ul>"#, items)
}

fn post_list(posts: &Page<PostView>) -> String {
    if posts.items.is_empty() {
        return "<p>No posts yet.</p>".to_string();
    }
    posts
        .items
        .iter()
        .map(|post| {
            format!(
                r#"<article class="post"><div class="meta"><a href="/user/{}">{}</a> &middot; <time datetime="{}">{}</time></div><p>{}</p></article>"#,
                attr(&urlencoding::encode(&post.author)),
                text(&post.author),
                post.created_at.to_rfc3339(),
                post.created_at.format("%Y-%m-%d %H:%M UTC"),
                render_body(&post.body)
            )
        })
        .collect()
}

fn pager(base: &str, posts: &Page<PostView>) -> String {
    let prev = posts
        .prev_num()
        .map(|n| format!(r#"<a href="{}?page={}">&larr; Newer posts</a>"#, attr(base), n))
        .unwrap_or_default();
    let next = posts
        .next_num()
        .map(|n| format!(r#"<a href="{}?page={}">Older posts &rarr;</a>"#, attr(base), n))
        .unwrap_or_default();
    format!(r#"<nav class="pager"><span>{}</span><span>{}</span></nav>"#, prev, next)
}

pub fn landing() -> String {
    r#"<h1>Welcome to Codr</h1><p>Short posts from the people you follow.</p><p><a href="/register">Create an account</a> or <a href="/login">sign in</a>.</p>"#.to_string()
}

pub fn register_form(username: &str, email: &str, errors: &[String]) -> String {
    format!(
        r#"<h1>Register</h1>{}<form method="post" action="/register">
<label>Username <input type="text" name="username" value="{}" required></label>
<label>Email <input type="email" name="email" value="{}" required></label>
<label>Password <input type="password" name="password" required></label>
<label>Repeat Password <input type="password" name="repeat_password" required></label>
<button type="submit">Register</button>
</form>"#,
        error_list(errors),
        attr(username),
        attr(email)
    )
}

pub fn login_form(action: &str, username: &str, errors: &[String]) -> String {
    format!(
        r#"<h1>Sign In</h1>{}<form method="post" action="{}">
<label>Username <input type="text" name="username" value="{}" required></label>
<label>Password <input type="password" name="password" required></label>
<label><input type="checkbox" name="remember_me" value="y"> Remember Me</label>
<button type="submit">Sign In</button>
</form>
<p>New here? <a href="/register">Register</a></p>
<p>Forgot your password? <a href="/forgot_password">Reset it</a></p>"#,
        error_list(errors),
        attr(action),
        attr(username)
    )
}

pub fn forgot_password_form(errors: &[String]) -> String {
    format!(
        r#"<h1>Forgot my password</h1>{}<form method="post" action="/forgot_password">
<label>Email <input type="email" name="email" required></label>
<button type="submit">Reset</button>
</form>"#,
        error_list(errors)
    )
}

pub fn reset_password_form(token: &str, errors: &[String]) -> String {
    format!(
        r#"<h1>Reset Your Password</h1>{}<form method="post" action="/reset_password/{}">
<label>Password <input type="password" name="password" required></label>
<label>Repeat Password <input type="password" name="password2" required></label>
<button type="submit">Reset Password</button>
</form>"#,
        error_list(errors),
        attr(&urlencoding::encode(token))
    )
}

pub fn feed(posts: &Page<PostView>, draft: &str, errors: &[String]) -> String {
    format!(
        r#"<h1>Feed</h1>{}<form method="post" action="/feed">
<label>Say something <textarea name="post" maxlength="280" required>{}</textarea></label>
<button type="submit">Psiu</button>
</form>{}{}"#,
        error_list(errors),
        text(draft),
        post_list(posts),
        pager("/feed", posts)
    )
}

pub fn explore(posts: &Page<PostView>) -> String {
    format!("<h1>Explore</h1>{}{}", post_list(posts), pager("/explore", posts))
}

pub struct Profile<'a> {
    pub user: &'a User,
    pub posts: &'a Page<PostView>,
    pub following: bool,
    pub is_self: bool,
    pub followers: usize,
    pub followings: usize,
}

pub fn profile(profile: &Profile) -> String {
    let user = profile.user;
    let encoded = urlencoding::encode(&user.username);
    let action = if profile.is_self {
        r#"<a href="/edit_profile">Edit your profile</a>"#.to_string()
    } else if profile.following {
        format!(r#"<a href="/unfollow/{}">Unfollow</a>"#, attr(&encoded))
    } else {
        format!(r#"<a href="/follow/{}">Follow</a>"#, attr(&encoded))
    };
    let bio = user
        .bio
        .as_ref()
        .map(|bio| format!(r#"<p class="bio">{}</p>"#, text(bio)))
        .unwrap_or_default();

    format!(
        r#"<h1>{}</h1>{}<p class="meta">Last seen {} &middot; {} followers &middot; {} following</p><p>{}</p>{}{}"#,
        text(&user.username),
        bio,
        user.last_seen.format("%Y-%m-%d %H:%M UTC"),
        profile.followers,
        profile.followings,
        action,
        post_list(profile.posts),
        pager(&format!("/user/{}", encoded), profile.posts)
    )
}

pub struct ProfileForm<'a> {
    pub username: &'a str,
    pub bio: &'a str,
    pub errors: &'a [String],
}

pub fn edit_profile_form(form: &ProfileForm) -> String {
    format!(
        r#"<h1>Edit Profile</h1>{}<form method="post" action="/edit_profile">
<label>Username <input type="text" name="username" value="{}" required></label>
<label>Bio <textarea name="bio" maxlength="140">{}</textarea></label>
<button type="submit">Submit</button>
</form>"#,
        error_list(form.errors),
        attr(form.username),
        text(form.bio)
    )
}
