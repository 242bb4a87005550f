use spin_sdk::http::Response;

use crate::config::*;
use crate::core::errors::{AppError, AppResult};
use crate::core::helpers::redirect_with_flash;
use crate::core::store::Transaction;
use crate::handlers::RequestCtx;
use crate::models::models::{Followers, Followings};
use crate::users::find_by_username;

/// Add the edge `follower_id -> followed_id`. Following twice is a no-op.
pub fn follow_user(tx: &Transaction, follower_id: &str, followed_id: &str) -> AppResult<()> {
    if follower_id == followed_id {
        return Err(AppError::SelfFollowRejected);
    }

    let mut outgoing = followings(tx, follower_id)?;
    if outgoing.iter().any(|id| id == followed_id) {
        return Ok(());
    }
    outgoing.push(followed_id.to_string());
    tx.set_json(&followings_key(follower_id), &outgoing)?;

    let mut incoming = followers(tx, followed_id)?;
    if !incoming.iter().any(|id| id == follower_id) {
        incoming.push(follower_id.to_string());
        tx.set_json(&followers_key(followed_id), &incoming)?;
    }

    Ok(())
}

/// Remove the edge if present; absent edges are left alone.
pub fn unfollow_user(tx: &Transaction, follower_id: &str, followed_id: &str) -> anyhow::Result<()> {
    let mut outgoing = followings(tx, follower_id)?;
    if !outgoing.iter().any(|id| id == followed_id) {
        return Ok(());
    }
    outgoing.retain(|id| id != followed_id);
    tx.set_json(&followings_key(follower_id), &outgoing)?;

    let mut incoming = followers(tx, followed_id)?;
    incoming.retain(|id| id != follower_id);
    tx.set_json(&followers_key(followed_id), &incoming)?;

    Ok(())
}

pub fn is_following(tx: &Transaction, follower_id: &str, followed_id: &str) -> anyhow::Result<bool> {
    Ok(followings(tx, follower_id)?.iter().any(|id| id == followed_id))
}

pub fn followings(tx: &Transaction, user_id: &str) -> anyhow::Result<Followings> {
    Ok(tx.get_json(&followings_key(user_id))?.unwrap_or_default())
}

pub fn followers(tx: &Transaction, user_id: &str) -> anyhow::Result<Followers> {
    Ok(tx.get_json(&followers_key(user_id))?.unwrap_or_default())
}

/// Authors whose posts appear in `user_id`'s feed: everyone they follow,
/// plus themselves.
pub fn followed_authors(tx: &Transaction, user_id: &str) -> anyhow::Result<Vec<String>> {
    let mut authors = followings(tx, user_id)?;
    if !authors.iter().any(|id| id == user_id) {
        authors.push(user_id.to_string());
    }
    Ok(authors)
}

// === HTTP Handlers ===

pub fn handle_follow(rc: &RequestCtx, username: &str) -> AppResult<Response> {
    let user = rc.require_user()?;
    let target = match find_by_username(rc.tx, username)? {
        Some(target) => target,
        None => {
            return Ok(redirect_with_flash(
                "/feed",
                &format!("User {} not found.", username),
            ))
        }
    };

    let profile_url = format!("/user/{}", urlencoding::encode(&target.username));
    match follow_user(rc.tx, &user.id, &target.id) {
        Ok(()) => {
            tracing::info!(follower = %user.username, followed = %target.username, "follow");
            Ok(redirect_with_flash(
                &profile_url,
                &format!("You are following {}", target.username),
            ))
        }
        Err(AppError::SelfFollowRejected) => {
            Ok(redirect_with_flash(&profile_url, "You cannot follow yourself!"))
        }
        Err(err) => Err(err),
    }
}

pub fn handle_unfollow(rc: &RequestCtx, username: &str) -> AppResult<Response> {
    let user = rc.require_user()?;
    let target = match find_by_username(rc.tx, username)? {
        Some(target) => target,
        None => {
            return Ok(redirect_with_flash(
                "/feed",
                &format!("User {} not found.", username),
            ))
        }
    };

    let profile_url = format!("/user/{}", urlencoding::encode(&target.username));
    if target.id == user.id {
        return Ok(redirect_with_flash(&profile_url, "You cannot unfollow yourself!"));
    }

    unfollow_user(rc.tx, &user.id, &target.id)?;
    tracing::info!(follower = %user.username, followed = %target.username, "unfollow");
    Ok(redirect_with_flash(
        &profile_url,
        &format!("You are not following {}.", target.username),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    #[test]
    fn follow_creates_the_edge() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);

        follow_user(&tx, "a", "b").unwrap();
        assert!(is_following(&tx, "a", "b").unwrap());
        assert!(!is_following(&tx, "b", "a").unwrap());
        assert!(followed_authors(&tx, "a").unwrap().contains(&"b".to_string()));
        assert_eq!(followers(&tx, "b").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn self_follow_is_rejected_without_changes() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);

        let err = follow_user(&tx, "a", "a").unwrap_err();
        assert!(matches!(err, AppError::SelfFollowRejected));
        assert!(!is_following(&tx, "a", "a").unwrap());
        assert!(!tx.has_writes());
    }

    #[test]
    fn follow_is_idempotent() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);

        follow_user(&tx, "a", "b").unwrap();
        follow_user(&tx, "a", "b").unwrap();
        assert_eq!(followings(&tx, "a").unwrap(), vec!["b".to_string()]);
        assert_eq!(followers(&tx, "b").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn unfollow_round_trip() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);

        follow_user(&tx, "a", "b").unwrap();
        unfollow_user(&tx, "a", "b").unwrap();
        assert!(!is_following(&tx, "a", "b").unwrap());
        assert!(followers(&tx, "b").unwrap().is_empty());

        // absent edge: still fine
        unfollow_user(&tx, "a", "b").unwrap();
        assert!(!is_following(&tx, "a", "b").unwrap());
    }

    #[test]
    fn followed_authors_always_includes_self() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);

        assert_eq!(followed_authors(&tx, "a").unwrap(), vec!["a".to_string()]);
        follow_user(&tx, "a", "b").unwrap();
        follow_user(&tx, "a", "c").unwrap();
        let authors = followed_authors(&tx, "a").unwrap();
        assert_eq!(authors.len(), 3);
        assert!(authors.contains(&"a".to_string()));
    }
}
