use std::sync::Arc;

use crate::config::Config;
use crate::core::store::{KvStore, Transaction};
use crate::mailer::Mailer;

/// Everything a request handler needs, built once at startup and passed
/// down explicitly.
pub struct AppContext {
    pub store: Box<dyn KvStore>,
    pub config: Config,
    pub mailer: Arc<dyn Mailer>,
}

impl AppContext {
    pub fn new(store: Box<dyn KvStore>, config: Config, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, config, mailer }
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction::begin(self.store.as_ref())
    }
}
