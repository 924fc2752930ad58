use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::buffer::AggregationBuffer;
use crate::config::WebConfig;

pub mod handlers;
pub mod metrics;

use self::handlers::health::health_check;
use self::handlers::metrics::metrics as metrics_handler;

#[derive(Clone)]
pub struct WebState {
    pub buffer: Arc<AggregationBuffer>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("metrics").get(metrics_handler))
}

#[derive(Clone)]
pub struct WebServer {
    config: WebConfig,
}

impl WebServer {
    pub fn new(config: WebConfig, buffer: Arc<AggregationBuffer>) -> Self {
        let _ = WEB_STATE.set(WebState {
            buffer,
            started_at: Instant::now(),
        });

        Self { config }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("starting web server on {bind_addr}");

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}
