use crate::client::{ClientSettings, Dial, HttpClient};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin over a fixed list of validated proxies.
#[derive(Debug)]
pub struct ProxyRotator {
    proxies: Vec<String>,
    current: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            current: AtomicUsize::new(0),
        }
    }

    /// Returns the next proxy, or `None` when the list is empty. `None` means
    /// "no proxy available" and must fail the dial, never fall back to a
    /// direct connection.
    pub fn next(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }

        let n = self.current.fetch_add(1, Ordering::Relaxed);
        Some(&self.proxies[n % self.proxies.len()])
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Builds a client that tunnels every new connection through the next
    /// proxy via SOCKS5.
    ///
    /// Certificate verification of the target is always disabled on this
    /// client: ad hoc proxy chains routinely break certificate chains, so
    /// choosing a proxy list is treated as opting in to unverified TLS. The
    /// direct client does not share this behaviour.
    pub fn client(self: Arc<Self>, settings: ClientSettings) -> anyhow::Result<HttpClient> {
        HttpClient::new(
            Dial::Rotating(self),
            ClientSettings {
                insecure: true,
                ..settings
            },
        )
    }
}
