use chrono::Utc;

use crate::auth::register;
use crate::core::errors::AppResult;
use crate::core::store::Transaction;
use crate::follow::follow_user;
use crate::posts::create_post;
use crate::users::{find_by_username, save_user};

struct DemoUser {
    username: &'static str,
    bio: &'static str,
    posts: &'static [&'static str],
}

const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        username: "test",
        bio: "Test user bio",
        posts: &["This is my first post on Codr!"],
    },
    DemoUser {
        username: "alice",
        bio: "Hello, I'm Alice!",
        posts: &[
            "Welcome to my board! Excited to share thoughts here.",
            "Just finished an amazing project. Feeling productive today!",
        ],
    },
    DemoUser {
        username: "bob",
        bio: "Bob's corner of the internet",
        posts: &["Hey everyone! Just joined Codr, looking forward to connecting with you all."],
    },
];

/// Create the demo accounts (password `{name}123`) unless they already
/// exist, plus a `test -> bob` follow edge.
pub fn init_demo_data(tx: &Transaction) -> AppResult<()> {
    let now = Utc::now();

    for demo in DEMO_USERS {
        if find_by_username(tx, demo.username)?.is_some() {
            continue;
        }
        let email = format!("{}@example.com", demo.username);
        let password = format!("{}123", demo.username);
        let mut user = register(tx, demo.username, &email, &password, now)?;
        user.bio = Some(demo.bio.to_string());
        save_user(tx, &user)?;

        for body in demo.posts {
            create_post(tx, &user.id, body, Utc::now())?;
        }
    }

    if let (Some(test), Some(bob)) = (find_by_username(tx, "test")?, find_by_username(tx, "bob")?) {
        follow_user(tx, &test.id, &bob.id)?;
    }

    tracing::info!("demo data ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authenticate;
    use crate::core::store::MemoryStore;
    use crate::feed::{explore, feed_for};
    use crate::follow::is_following;

    #[test]
    fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        let tx = Transaction::begin(&store);
        init_demo_data(&tx).unwrap();
        init_demo_data(&tx).unwrap();

        assert_eq!(explore(&tx, 1, 50).unwrap().total, 4);
        let test = authenticate(&tx, "test", "test123").unwrap();
        let bob = find_by_username(&tx, "bob").unwrap().unwrap();
        assert!(is_following(&tx, &test.id, &bob.id).unwrap());
        assert_eq!(feed_for(&tx, &test.id, 1, 50).unwrap().total, 2);
    }
}
