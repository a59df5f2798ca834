//! Turns intercepted network exchanges into the endpoint inventory.

use crate::driver::{Browser, Exchange, ExchangeReceiver};
use crate::endpoint::{Endpoint, EndpointRequest, EndpointResponse, EndpointSet};
use crate::error::Result;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task recording every exchange the browser intercepts.
pub struct EndpointRecorder {
    endpoints: EndpointSet,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl EndpointRecorder {
    /// Register with the browser's interception and start recording.
    ///
    /// Call this before the first navigation so no exchange is missed.
    pub async fn start<B: Browser>(
        browser: &B,
        pattern: &str,
        endpoints: EndpointSet,
    ) -> Result<Self> {
        let exchanges = browser.intercept_requests(pattern).await?;
        Ok(Self::from_receiver(exchanges, endpoints))
    }

    pub fn from_receiver(exchanges: ExchangeReceiver, endpoints: EndpointSet) -> Self {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run(exchanges, endpoints.clone(), shutdown.clone()));
        Self {
            endpoints,
            shutdown,
            handle,
        }
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Stop taking new exchanges, finish the ones already received, and
    /// return the recorded endpoints.
    pub async fn finish(self) -> Vec<Endpoint> {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            warn!("Endpoint recorder task failed: {}", e);
        }
        let endpoints = self.endpoints.snapshot().await;
        info!("Recorded {} unique endpoints", endpoints.len());
        endpoints
    }
}

async fn run(mut exchanges: ExchangeReceiver, endpoints: EndpointSet, shutdown: CancellationToken) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    warn!("Exchange task failed: {}", e);
                }
            }
            received = exchanges.recv() => match received {
                Some(exchange) => {
                    in_flight.spawn(record(exchange, endpoints.clone()));
                }
                None => break,
            },
        }
    }

    // Anything the driver already handed over still gets completed.
    exchanges.close();
    while let Some(exchange) = exchanges.recv().await {
        in_flight.spawn(record(exchange, endpoints.clone()));
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!("Exchange task failed: {}", e);
        }
    }
    debug!("Endpoint recorder drained");
}

/// Complete one exchange and record it. Failures only affect this exchange.
pub async fn record(mut exchange: Box<dyn Exchange>, endpoints: EndpointSet) -> bool {
    let request = exchange.request().clone();
    let response = match exchange.complete().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Skipping {} {}: {}", request.method, request.url, e);
            return false;
        }
    };

    let endpoint = Endpoint::new(
        &request.url,
        EndpointRequest {
            method: request.method,
            body: request.body,
            headers: request.headers,
        },
        EndpointResponse {
            code: response.status,
            body: response.body,
            headers: response.headers,
        },
    );
    let uri = endpoint.uri.clone();
    let inserted = endpoints.insert(endpoint).await;
    if inserted {
        debug!("New endpoint {}", uri);
    }
    inserted
}
