//! In-process HTTP target and SOCKS5 proxy for tests.

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
pub struct TargetState {
    pub hits: AtomicU64,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub user_agents: Mutex<Vec<String>>,
}

pub struct TestTarget {
    pub addr: SocketAddr,
    pub state: Arc<TargetState>,
}

impl TestTarget {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

/// Serves `status` to every request after sleeping for `delay`.
pub async fn spawn_target(delay: Duration, status: StatusCode) -> TestTarget {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(TargetState::default());

    let shared = state.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = shared.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = state.clone();
                    async move { respond(&state, req, delay, status).await }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    TestTarget { addr, state }
}

async fn respond(
    state: &TargetState,
    req: Request<Incoming>,
    delay: Duration,
    status: StatusCode,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(agent) = req.headers().get(http::header::USER_AGENT) {
        let agent = agent.to_str().unwrap_or_default().to_string();
        state.user_agents.lock().unwrap().push(agent);
    }

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(b"ok")))
        .unwrap())
}

/// Minimal no-auth SOCKS5 server supporting CONNECT. Returns its address and
/// a counter of accepted client connections.
pub async fn spawn_socks5() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((client, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = handle_socks5(client).await;
            });
        }
    });

    (addr, connections)
}

async fn handle_socks5(mut client: TcpStream) -> io::Result<()> {
    let mut header = [0u8; 2];
    client.read_exact(&mut header).await?;
    let mut methods = vec![0u8; header[1] as usize];
    client.read_exact(&mut methods).await?;
    client.write_all(&[5, 0]).await?;

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    let ip = match request[3] {
        1 => {
            let mut octets = [0u8; 4];
            client.read_exact(&mut octets).await?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        4 => {
            let mut octets = [0u8; 16];
            client.read_exact(&mut octets).await?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    };
    let domain = if ip.is_none() {
        let len = client.read_u8().await? as usize;
        let mut name = vec![0u8; len];
        client.read_exact(&mut name).await?;
        Some(String::from_utf8_lossy(&name).into_owned())
    } else {
        None
    };
    let port = client.read_u16().await?;

    let mut upstream = match (ip, domain) {
        (Some(ip), _) => TcpStream::connect((ip, port)).await?,
        (None, Some(domain)) => TcpStream::connect((domain.as_str(), port)).await?,
        (None, None) => unreachable!(),
    };
    client.write_all(&[5, 0, 0, 1, 0, 0, 0, 0, 0, 0]).await?;

    io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
