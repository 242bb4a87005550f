//! Feed composition: which posts a user sees, in which order, one page at a
//! time. Everything is recomputed from the store on each call.

use std::collections::{HashMap, HashSet};

use crate::config::*;
use crate::core::store::Transaction;
use crate::follow::followed_authors;
use crate::models::models::{Page, Post, PostView};
use crate::users::get_user;

fn load_posts(tx: &Transaction) -> anyhow::Result<Vec<Post>> {
    let ids: Vec<u64> = tx.get_json(POSTS_LIST_KEY)?.unwrap_or_default();
    let mut posts = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(post) = tx.get_json::<Post>(&post_key(id))? {
            posts.push(post);
        }
    }
    Ok(posts)
}

/// Newest first; equal timestamps fall back to the higher id.
fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

fn paginate(tx: &Transaction, mut posts: Vec<Post>, page: usize, page_size: usize) -> anyhow::Result<Page<PostView>> {
    let page = page.max(1);
    let page_size = page_size.max(1);

    sort_newest_first(&mut posts);
    let total = posts.len();
    let offset = (page - 1).saturating_mul(page_size);

    let mut authors: HashMap<String, String> = HashMap::new();
    let mut items = Vec::new();
    for post in posts.into_iter().skip(offset).take(page_size) {
        let author = match authors.get(&post.user_id) {
            Some(name) => name.clone(),
            None => {
                let name = get_user(tx, &post.user_id)?
                    .map(|u| u.username)
                    .unwrap_or_else(|| "[unknown]".to_string());
                authors.insert(post.user_id.clone(), name.clone());
                name
            }
        };
        items.push(PostView {
            id: post.id,
            author_id: post.user_id,
            author,
            body: post.body,
            created_at: post.created_at,
        });
    }

    Ok(Page { items, page, page_size, total })
}

/// Posts by `user_id` and everyone they follow.
pub fn feed_for(tx: &Transaction, user_id: &str, page: usize, page_size: usize) -> anyhow::Result<Page<PostView>> {
    let authors: HashSet<String> = followed_authors(tx, user_id)?.into_iter().collect();
    let posts = load_posts(tx)?
        .into_iter()
        .filter(|p| authors.contains(&p.user_id))
        .collect();
    paginate(tx, posts, page, page_size)
}

/// Every post in the system.
pub fn explore(tx: &Transaction, page: usize, page_size: usize) -> anyhow::Result<Page<PostView>> {
    let posts = load_posts(tx)?;
    paginate(tx, posts, page, page_size)
}

/// Posts written by a single author, for profile pages.
pub fn posts_by(tx: &Transaction, user_id: &str, page: usize, page_size: usize) -> anyhow::Result<Page<PostView>> {
    let posts = load_posts(tx)?
        .into_iter()
        .filter(|p| p.user_id == user_id)
        .collect();
    paginate(tx, posts, page, page_size)
}
