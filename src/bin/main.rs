#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::sync::Arc;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use codr::app::AppContext;
    use codr::config::Config;
    use codr::core::db::init_demo_data;
    use codr::core::store::MemoryStore;
    use codr::mailer::{LogMailer, Mailer};

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                _ => Method::Get,
            };

            let mut builder = Request::builder();
            builder.method(method).uri(req.uri().to_string());
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    builder.header(name.as_str(), val_str);
                }
            }
            builder.body(body.to_vec()).build()
        }

        const FORWARDED_HEADERS: &[&str] = &["content-type", "location", "set-cookie", "cache-control"];

        pub fn spin_to_actix_response(spin_resp: spin_sdk::http::Response) -> actix_web::HttpResponse {
            let status = *spin_resp.status();

            let mut response = actix_web::HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status)
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
            );
            for name in FORWARDED_HEADERS {
                if let Some(val_str) = spin_resp.header(name).and_then(|v| v.as_str()) {
                    response.append_header((*name, val_str.to_string()));
                }
            }

            response.body(spin_resp.into_body())
        }
    }

    pub async fn run() -> std::io::Result<()> {
        codr::logging::setup_logging();

        let config = Config::from_env();
        let store = MemoryStore::new();
        let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);

        if config.seed_demo {
            let ctx = AppContext::new(Box::new(store.clone()), config.clone(), mailer.clone());
            let tx = ctx.begin();
            init_demo_data(&tx)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            tx.commit()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))?;
        }

        let bind_addr = config.bind_addr.clone();
        tracing::info!("Server listening on http://{}", bind_addr);

        HttpServer::new(move || {
            let ctx = AppContext::new(Box::new(store.clone()), config.clone(), mailer.clone());
            App::new()
                .app_data(web::Data::new(ctx))
                .default_service(web::route().to(handle_all))
        })
        .bind(bind_addr)?
        .run()
        .await
    }

    async fn handle_all(ctx: web::Data<AppContext>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = adapter::actix_to_spin_request(&req, body);
        adapter::spin_to_actix_response(codr::handlers::route(&ctx, spin_req))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
