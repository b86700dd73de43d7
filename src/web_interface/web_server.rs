use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::info;
use warp::Filter;

use super::routes::{enrich_file_route, index_route, list_records_route};
use crate::enrichment::Enricher;
use crate::error_handling::types::WebError;
use crate::storage::storage_trait::RecordStorage;

/// API error payload
#[derive(serde::Serialize)]
pub struct ApiError {
    pub message: String,
}

/// HTTP API serving enriched documents for stored records
pub struct WebServer {
    storage: Arc<dyn RecordStorage>,
    enricher: Arc<Enricher>,
}

impl WebServer {
    /// Create a new WebServer instance
    pub fn new(storage: Arc<dyn RecordStorage>, enricher: Arc<Enricher>) -> Self {
        Self { storage, enricher }
    }

    /// Resolve the listening address
    pub fn socket_addr(bind_address: &str, port: u16) -> Result<SocketAddr, WebError> {
        let ip: IpAddr = bind_address
            .parse()
            .map_err(|_| WebError::BadAddress(bind_address.to_string()))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Start the web server and serve until the process stops
    pub async fn start(&self, bind_address: &str, port: u16) -> Result<(), WebError> {
        let addr = Self::socket_addr(bind_address, port)?;

        // Compose routes
        let routes = index_route()
            .or(list_records_route(self.storage.clone()))
            .or(enrich_file_route(self.storage.clone(), self.enricher.clone()));

        info!("Web server listening on {}", addr);
        warp::serve(routes).run(addr).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        let addr = WebServer::socket_addr("127.0.0.1", 8080).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
        let addr = WebServer::socket_addr("::", 9000).unwrap();
        assert_eq!(addr.port(), 9000);
        assert!(matches!(
            WebServer::socket_addr("localhost", 80),
            Err(WebError::BadAddress(_))
        ));
    }
}
