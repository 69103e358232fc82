//! Outbound transports and the SSRF guard wrapped around them.

use reqwest::{dns, Request, Response};
use std::{
    error::Error as StdError,
    fmt,
    future::Future,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::{debug, warn};
use url::Host;

use super::blocklist::{BlockList, ConnectDecision, RejectReason};

/// Opaque failure for guarded requests.
///
/// Blocked destinations and ordinary network failures look the same to the
/// caller; the reason is only logged.
#[derive(Debug)]
pub struct EgressError {
    _private: (),
}

impl EgressError {
    fn canceled() -> Self {
        Self { _private: () }
    }
}

impl fmt::Display for EgressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("outbound request canceled")
    }
}

impl StdError for EgressError {}

/// Anything that can send a built request.
pub trait Transport: Send + Sync {
    fn execute(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send;
}

impl Transport for reqwest::Client {
    fn execute(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send {
        reqwest::Client::execute(self, request)
    }
}

/// Decorator that checks every destination against the block list before the
/// inner transport is touched.
#[derive(Clone, Debug)]
pub struct SafeTransport<T> {
    inner: T,
    blocklist: Arc<BlockList>,
}

impl<T: Transport> SafeTransport<T> {
    #[must_use]
    pub fn new(inner: T, blocklist: Arc<BlockList>) -> Self {
        Self { inner, blocklist }
    }

    #[must_use]
    pub fn blocklist(&self) -> &BlockList {
        &self.blocklist
    }

    /// # Errors
    /// Returns [`EgressError`] if the destination is blocked, cannot be
    /// resolved, or the inner transport fails.
    pub async fn execute(&self, request: Request) -> Result<Response, EgressError> {
        let addrs = destination_addrs(&request).await?;
        for addr in &addrs {
            if let ConnectDecision::Reject(reason) = self.blocklist.decide(&addr.to_string()) {
                log_rejection(request.url().as_str(), reason);
                return Err(EgressError::canceled());
            }
        }

        self.inner.execute(request).await.map_err(|err| {
            debug!(error = %err, "outbound request failed");
            EgressError::canceled()
        })
    }
}

fn log_rejection(target: &str, reason: RejectReason) {
    match reason {
        RejectReason::Private(ip) => {
            warn!(target_url = %target, ip = %ip, "blocked outbound request to private address");
        }
        RejectReason::Unparseable => {
            warn!(target_url = %target, "blocked outbound request with unparseable address");
        }
    }
}

/// Every address the request could dial: the literal IP, or every address the
/// hostname resolves to.
async fn destination_addrs(request: &Request) -> Result<Vec<SocketAddr>, EgressError> {
    let url = request.url();
    let port = url.port_or_known_default().ok_or_else(|| {
        debug!(url = %url, "outbound url has no port");
        EgressError::canceled()
    })?;

    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(vec![SocketAddr::new(IpAddr::V4(ip), port)]),
        Some(Host::Ipv6(ip)) => Ok(vec![SocketAddr::new(IpAddr::V6(ip), port)]),
        Some(Host::Domain(domain)) => {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|err| {
                    debug!(error = %err, host = %domain, "outbound dns lookup failed");
                    EgressError::canceled()
                })?
                .collect();
            if addrs.is_empty() {
                return Err(EgressError::canceled());
            }
            Ok(addrs)
        }
        None => Err(EgressError::canceled()),
    }
}

/// DNS resolver for reqwest that refuses to hand out blocked addresses, so the
/// address reqwest dials is the one that was checked.
#[derive(Clone, Debug)]
pub struct GuardedResolver {
    blocklist: Arc<BlockList>,
}

impl GuardedResolver {
    #[must_use]
    pub fn new(blocklist: Arc<BlockList>) -> Self {
        Self { blocklist }
    }
}

impl dns::Resolve for GuardedResolver {
    fn resolve(&self, name: dns::Name) -> dns::Resolving {
        let blocklist = Arc::clone(&self.blocklist);
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            if let Some(blocked) = addrs.iter().find(|addr| blocklist.is_private(addr.ip())) {
                warn!(host = %host, ip = %blocked.ip(), "blocked dns answer for outbound request");
                return Err(Box::new(EgressError::canceled()) as Box<dyn StdError + Send + Sync>);
            }
            let addrs: dns::Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}

/// Build a reqwest client that resolves through [`GuardedResolver`], ignores
/// proxies and never follows redirects, wrapped in [`SafeTransport`].
///
/// # Errors
/// Returns an error if the client cannot be built.
pub fn safe_client(
    builder: reqwest::ClientBuilder,
    blocklist: Arc<BlockList>,
) -> reqwest::Result<SafeTransport<reqwest::Client>> {
    let client = builder
        .dns_resolver(Arc::new(GuardedResolver::new(Arc::clone(&blocklist))))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()?;
    Ok(SafeTransport::new(client, blocklist))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        calls: Arc<AtomicUsize>,
    }

    impl Transport for RecordingTransport {
        async fn execute(&self, _request: Request) -> reqwest::Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::from(http::Response::new("ok")))
        }
    }

    fn request(url: &str) -> Request {
        reqwest::Client::new().get(url).build().unwrap()
    }

    fn guarded(blocklist: BlockList) -> (SafeTransport<RecordingTransport>, Arc<AtomicUsize>) {
        let inner = RecordingTransport::default();
        let calls = Arc::clone(&inner.calls);
        (SafeTransport::new(inner, Arc::new(blocklist)), calls)
    }

    #[tokio::test]
    async fn loopback_is_canceled_before_inner_transport() {
        let (transport, calls) = guarded(BlockList::default());
        let err = transport
            .execute(request("http://127.0.0.1:8080/hook"))
            .await
            .err();
        assert_eq!(
            err.map(|err| err.to_string()),
            Some("outbound request canceled".to_string())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn private_ipv6_and_metadata_addresses_are_canceled() {
        let (transport, calls) = guarded(BlockList::default());
        for url in [
            "http://[::1]/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::ffff:10.0.0.1]/",
            "http://localhost:9/",
        ] {
            assert!(transport.execute(request(url)).await.is_err(), "{url}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn public_literal_proceeds() {
        let (transport, calls) = guarded(BlockList::default());
        let response = transport
            .execute(request("https://93.184.215.14/hook"))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn allow_loopback_lets_local_requests_through() {
        let (transport, calls) = guarded(BlockList::builder().allow_loopback().build());
        assert!(transport.execute(request("http://127.0.0.1:8080/")).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn safe_client_never_connects_to_blocked_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = safe_client(reqwest::Client::builder(), Arc::new(BlockList::default())).unwrap();

        let by_ip = transport
            .execute(request(&format!("http://127.0.0.1:{port}/")))
            .await;
        let by_name = transport
            .execute(request(&format!("http://localhost:{port}/")))
            .await;
        assert!(by_ip.is_err());
        assert!(by_name.is_err());

        let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err(), "listener must not see a connection");
    }

    #[tokio::test]
    async fn guarded_resolver_rejects_private_answers() {
        let resolver = GuardedResolver::new(Arc::new(BlockList::default()));
        let name: dns::Name = "localhost".parse().unwrap();
        let result = dns::Resolve::resolve(&resolver, name).await;
        assert!(result.is_err());
    }
}
