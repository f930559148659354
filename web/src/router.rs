use crate::{controller::health_check_controller, middleware::tls::require_tls, sse, AppState};
use axum::{
    http::{header::CACHE_CONTROL, HeaderValue},
    middleware::from_fn,
    routing::get,
    Router,
};
use service::config::Config;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};

const PRODUCTION_ASSET_CACHE: &str = "public, max-age=31536000";
const DEVELOPMENT_ASSET_CACHE: &str = "public, max-age=0";

pub fn define_routes(app_state: AppState) -> Router {
    let production = app_state.config.is_production();
    let router = Router::new()
        .merge(health_routes())
        .merge(static_routes(&app_state.config))
        .merge(stream_routes(app_state));

    if production {
        router.layer(from_fn(require_tls))
    } else {
        router
    }
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn stream_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/stream/messages", get(sse::handler::stream_messages))
        .with_state(app_state)
}

fn static_routes(config: &Config) -> Router {
    let cache_control = if config.is_production() {
        PRODUCTION_ASSET_CACHE
    } else {
        DEVELOPMENT_ASSET_CACHE
    };

    Router::new()
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        ))
}
