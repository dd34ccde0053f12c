use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{DedupConfig, FetchError, FetchRequest, RequestDeduplicator};

/// Something that can execute a request
///
/// Implementations map non-success statuses to [`FetchError::Status`] and
/// everything else that prevents a response to [`FetchError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Response: Clone + Send + Sync + 'static;

    async fn send(&self, request: &FetchRequest) -> Result<Self::Response, FetchError>;
}

/// A transport whose identical concurrent requests go out once
pub struct DedupClient<T: Transport> {
    transport: Arc<T>,
    dedup: RequestDeduplicator<T::Response>,
}

impl<T: Transport> Clone for DedupClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            dedup: self.dedup.clone(),
        }
    }
}

impl<T: Transport> DedupClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_deduplicator(transport, RequestDeduplicator::new(DedupConfig::default()))
    }

    pub fn with_deduplicator(transport: T, dedup: RequestDeduplicator<T::Response>) -> Self {
        Self {
            transport: Arc::new(transport),
            dedup,
        }
    }

    pub fn deduplicator(&self) -> &RequestDeduplicator<T::Response> {
        &self.dedup
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request`, sharing an identical in-flight or recent one
    pub async fn fetch(&self, request: FetchRequest) -> Result<T::Response, FetchError> {
        self.fetch_with_ttl(request, None).await
    }

    /// [`fetch`](Self::fetch) with a custom replay TTL
    pub async fn fetch_with_ttl(
        &self,
        request: FetchRequest,
        ttl: Option<Duration>,
    ) -> Result<T::Response, FetchError> {
        let transport = &self.transport;
        self.dedup
            .fetch(&request, ttl, || transport.send(&request))
            .await
    }

    /// `GET url`
    pub async fn get(&self, url: impl Into<String>) -> Result<T::Response, FetchError> {
        self.fetch(FetchRequest::get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        type Response = String;

        async fn send(&self, request: &FetchRequest) -> Result<String, FetchError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if request.url.ends_with("/missing") {
                return Err(FetchError::Status {
                    status: 404,
                    url: request.url.clone(),
                });
            }
            Ok(format!("{} {}", request.method, request.url))
        }
    }

    #[tokio::test]
    async fn test_identical_requests_hit_transport_once() {
        let client = DedupClient::new(CountingTransport::default());

        let (a, b, c) = tokio::join!(
            client.get("/api/x"),
            client.get("/api/x"),
            client.get("/api/x")
        );
        assert_eq!(client.transport().sent.load(Ordering::SeqCst), 1);
        assert_eq!(a, Ok("GET /api/x".to_string()));
        assert_eq!(b, a);
        assert_eq!(c, a);
    }

    #[tokio::test]
    async fn test_different_bodies_are_different_requests() {
        let client = DedupClient::new(CountingTransport::default());

        let (a, b) = tokio::join!(
            client.fetch(FetchRequest::post("/api/x", "1")),
            client.fetch(FetchRequest::post("/api/x", "2"))
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(client.transport().sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_error_shared() {
        let client = DedupClient::new(CountingTransport::default());

        let (a, b) = tokio::join!(client.get("/api/missing"), client.get("/api/missing"));
        let expected = Err(FetchError::Status {
            status: 404,
            url: "/api/missing".into(),
        });
        assert_eq!(a, expected);
        assert_eq!(b, expected);
        assert_eq!(client.transport().sent.load(Ordering::SeqCst), 1);
    }
}
