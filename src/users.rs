use chrono::{DateTime, Utc};
use spin_sdk::http::Response;

use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::redirect_with_flash;
use crate::core::query_params::{get_int, parse_body};
use crate::core::store::Transaction;
use crate::feed::posts_by;
use crate::follow::{followers, followings, is_following};
use crate::forms::{normalize_email, validate_profile, ProfileEdit};
use crate::handlers::RequestCtx;
use crate::models::models::User;
use crate::templates;

pub fn get_user(tx: &Transaction, user_id: &str) -> anyhow::Result<Option<User>> {
    tx.get_json(&user_key(user_id))
}

pub fn find_by_username(tx: &Transaction, username: &str) -> anyhow::Result<Option<User>> {
    match tx.get_json::<String>(&username_key(username))? {
        Some(id) => get_user(tx, &id),
        None => Ok(None),
    }
}

/// Emails are matched after [`normalize_email`].
pub fn find_by_email(tx: &Transaction, email: &str) -> anyhow::Result<Option<User>> {
    match tx.get_json::<String>(&email_key(&normalize_email(email)))? {
        Some(id) => get_user(tx, &id),
        None => Ok(None),
    }
}

pub fn username_taken(tx: &Transaction, username: &str) -> anyhow::Result<bool> {
    Ok(tx.get(&username_key(username))?.is_some())
}

pub fn email_taken(tx: &Transaction, email: &str) -> anyhow::Result<bool> {
    Ok(tx.get(&email_key(&normalize_email(email)))?.is_some())
}

pub fn save_user(tx: &Transaction, user: &User) -> anyhow::Result<()> {
    tx.set_json(&user_key(&user.id), user)
}

/// Store a brand new user together with both uniqueness indexes.
pub fn insert_user(tx: &Transaction, user: &User) -> anyhow::Result<()> {
    save_user(tx, user)?;
    tx.set_json(&username_key(&user.username), &user.id)?;
    tx.set_json(&email_key(&user.email), &user.id)
}

pub fn touch_last_seen(tx: &Transaction, user: &mut User, now: DateTime<Utc>) -> anyhow::Result<()> {
    user.last_seen = now;
    save_user(tx, user)
}

/// Change display fields. The username index moves with the name.
pub fn edit_profile(tx: &Transaction, user: &mut User, edit: ProfileEdit) -> AppResult<()> {
    if edit.username != user.username {
        if username_taken(tx, &edit.username)? {
            return Err(AppError::DuplicateIdentity { field: "username" });
        }
        tx.delete(&username_key(&user.username));
        tx.set_json(&username_key(&edit.username), &user.id)?;
        tracing::info!(user_id = %user.id, from = %user.username, to = %edit.username, "username changed");
        user.username = edit.username;
    }
    user.bio = edit.bio;
    save_user(tx, user)?;
    Ok(())
}

// === HTTP Handlers ===

pub fn show_profile(rc: &RequestCtx, username: &str) -> AppResult<Response> {
    let viewer = rc.require_user()?;
    let user = find_by_username(rc.tx, username)?
        .ok_or_else(|| AppError::not_found("User", username))?;

    let page = get_int(&rc.query(), "page", 1);
    let posts = posts_by(rc.tx, &user.id, page, rc.app.config.posts_per_page)?;
    let profile = templates::Profile {
        following: viewer.id != user.id && is_following(rc.tx, &viewer.id, &user.id)?,
        is_self: viewer.id == user.id,
        followers: followers(rc.tx, &user.id)?.len(),
        followings: followings(rc.tx, &user.id)?.len(),
        user: &user,
        posts: &posts,
    };

    Ok(rc.render(200, &user.username, &templates::profile(&profile)))
}

pub fn edit_profile_page(rc: &RequestCtx) -> AppResult<Response> {
    let user = rc.require_user()?;
    let form = templates::ProfileForm {
        username: &user.username,
        bio: user.bio.as_deref().unwrap_or_default(),
        errors: &[],
    };
    Ok(rc.render(200, "Edit Profile", &templates::edit_profile_form(&form)))
}

pub fn submit_edit_profile(rc: &RequestCtx) -> AppResult<Response> {
    let mut user = rc.require_user()?.clone();
    let fields = parse_body(rc.req);

    let outcome = validate_profile(&fields)
        .map_err(AppError::ValidationFailed)
        .and_then(|edit| edit_profile(rc.tx, &mut user, edit));

    match outcome {
        Ok(()) => Ok(redirect_with_flash("/edit_profile", "Your changes have been saved.")),
        Err(err) if err.is_recoverable() => {
            let errors = vec![err.user_message()];
            let form = templates::ProfileForm {
                username: fields.get("username").map(|s| s.as_str()).unwrap_or_default(),
                bio: fields.get("bio").map(|s| s.as_str()).unwrap_or_default(),
                errors: &errors,
            };
            Ok(rc.render(err.status_code().as_u16(), "Edit Profile", &templates::edit_profile_form(&form)))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::register;
    use crate::core::store::MemoryStore;

    #[test]
    fn lookups_by_username_and_email() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        assert_eq!(find_by_username(&tx, "alice").unwrap().unwrap().id, alice.id);
        assert_eq!(find_by_email(&tx, "alice@example.com").unwrap().unwrap().id, alice.id);
        assert!(find_by_username(&tx, "nobody").unwrap().is_none());
    }

    #[test]
    fn unrelated_sign_ups_commit_side_by_side() {
        let store = MemoryStore::new();
        let first = Transaction::begin(&store);
        let second = Transaction::begin(&store);
        register(&first, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();
        register(&second, "bob", "bob@example.com", "secret1", Utc::now()).unwrap();

        first.commit().unwrap();
        second.commit().unwrap();

        let tx = Transaction::begin(&store);
        assert!(find_by_username(&tx, "alice").unwrap().is_some());
        assert!(find_by_username(&tx, "bob").unwrap().is_some());
    }

    #[test]
    fn rename_moves_the_username_index() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let mut alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        let edit = ProfileEdit { username: "alicia".to_string(), bio: Some("hi".to_string()) };
        edit_profile(&tx, &mut alice, edit).unwrap();

        assert!(find_by_username(&tx, "alice").unwrap().is_none());
        let renamed = find_by_username(&tx, "alicia").unwrap().unwrap();
        assert_eq!(renamed.id, alice.id);
        assert_eq!(renamed.bio.as_deref(), Some("hi"));
    }

    #[test]
    fn rename_onto_another_user_is_rejected() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let mut alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();
        register(&tx, "bob", "bob@example.com", "secret1", Utc::now()).unwrap();

        let edit = ProfileEdit { username: "bob".to_string(), bio: None };
        let err = edit_profile(&tx, &mut alice, edit).unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity { field: "username" }));
        assert_eq!(get_user(&tx, &alice.id).unwrap().unwrap().username, "alice");
    }

    #[test]
    fn keeping_own_username_is_allowed() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        let mut alice = register(&tx, "alice", "alice@example.com", "secret1", Utc::now()).unwrap();

        let edit = ProfileEdit { username: "alice".to_string(), bio: Some("new bio".to_string()) };
        edit_profile(&tx, &mut alice, edit).unwrap();
        assert_eq!(get_user(&tx, &alice.id).unwrap().unwrap().bio.as_deref(), Some("new bio"));
    }
}
