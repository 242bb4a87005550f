pub mod app;
pub mod auth;
pub mod config;
pub mod core;
pub mod feed;
pub mod follow;
pub mod forms;
pub mod handlers;
pub mod logging;
pub mod mailer;
pub mod models;
pub mod posts;
pub mod templates;
pub mod tokens;
pub mod users;

#[cfg(target_arch = "wasm32")]
static LOGGING: std::sync::Once = std::sync::Once::new();

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<impl spin_sdk::http::IntoResponse> {
    use std::sync::Arc;

    LOGGING.call_once(logging::setup_logging);
    let config = config::Config::from_env();
    let store = crate::core::store::SpinStore::open_default()?;
    let ctx = app::AppContext::new(Box::new(store), config, Arc::new(mailer::LogMailer));

    if ctx.config.seed_demo {
        let tx = ctx.begin();
        if let Err(err) = crate::core::db::init_demo_data(&tx) {
            tracing::warn!(error = %err, "demo data not created");
        } else if let Err(err) = tx.commit() {
            tracing::warn!(?err, "demo data not saved");
        }
    }

    Ok(handlers::route(&ctx, req))
}
