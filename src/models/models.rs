use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Post {
    pub id: u64,
    pub user_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A post joined with its author's current username, ready for rendering.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PostView {
    pub id: u64,
    pub author_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionData {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One offset-based page of an ordered result.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.page.saturating_mul(self.page_size) < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn next_num(&self) -> Option<usize> {
        self.has_next().then(|| self.page + 1)
    }

    pub fn prev_num(&self) -> Option<usize> {
        self.has_prev().then(|| self.page - 1)
    }
}

pub type Followings = Vec<String>;
pub type Followers = Vec<String>;
