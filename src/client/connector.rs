use crate::proxy::ProxyRotator;
use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use socket2::TcpKeepalive;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_socks::tcp::Socks5Stream;
use tower_service::Service;
use tracing::debug;

/// How new connections reach the target.
#[derive(Debug, Clone)]
pub enum Dial {
    Direct,
    /// Each new connection goes through the rotator's next proxy.
    Rotating(Arc<ProxyRotator>),
}

#[derive(Debug, Error)]
pub enum DialError {
    #[error("proxy address is empty")]
    NoProxy,
    #[error("connect timed out")]
    Timeout,
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("target uri has no host")]
    MissingHost,
    #[error("invalid tls server name {0:?}")]
    InvalidServerName(String),
    #[error("tcp connect failed: {0}")]
    Io(#[from] io::Error),
    #[error("socks5 connect via {proxy} failed: {source}")]
    Socks {
        proxy: String,
        #[source]
        source: tokio_socks::Error,
    },
    #[error("tls handshake failed: {0}")]
    Tls(#[source] io::Error),
}

#[derive(Clone)]
pub struct Connector {
    dial: Dial,
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl Connector {
    pub fn new(dial: Dial, tls: TlsConnector, connect_timeout: Duration) -> Self {
        Self {
            dial,
            tls,
            connect_timeout,
        }
    }

    async fn connect(self, dst: Uri) -> Result<DialedConnection, DialError> {
        let https = match dst.scheme_str() {
            Some("https") => true,
            Some("http") | None => false,
            Some(other) => return Err(DialError::UnsupportedScheme(other.to_string())),
        };
        let host = dst
            .host()
            .ok_or(DialError::MissingHost)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = dst.port_u16().unwrap_or(if https { 443 } else { 80 });

        let stream = match &self.dial {
            Dial::Direct => {
                debug!("Dialing {}:{} directly", host, port);
                self.tcp_connect((host.as_str(), port)).await?
            }
            Dial::Rotating(rotator) => {
                let proxy = rotator.next().ok_or(DialError::NoProxy)?;
                debug!("Dialing {}:{} via proxy {}", host, port, proxy);
                let socket = self.tcp_connect(proxy).await?;
                let tunnel = time::timeout(
                    self.connect_timeout,
                    Socks5Stream::connect_with_socket(socket, (host.as_str(), port)),
                )
                .await
                .map_err(|_| DialError::Timeout)?
                .map_err(|source| DialError::Socks {
                    proxy: proxy.to_string(),
                    source,
                })?;
                tunnel.into_inner()
            }
        };

        let stream = if https {
            let server_name = ServerName::try_from(host.clone())
                .map_err(|_| DialError::InvalidServerName(host.clone()))?;
            let tls = time::timeout(self.connect_timeout, self.tls.connect(server_name, stream))
                .await
                .map_err(|_| DialError::Timeout)?
                .map_err(DialError::Tls)?;
            MaybeTlsStream::Tls(Box::new(tls))
        } else {
            MaybeTlsStream::Plain(stream)
        };

        Ok(DialedConnection {
            io: TokioIo::new(stream),
        })
    }

    async fn tcp_connect<A>(&self, addr: A) -> Result<TcpStream, DialError>
    where
        A: tokio::net::ToSocketAddrs,
    {
        let stream = time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DialError::Timeout)??;
        configure_keepalive(&stream)?;
        Ok(stream)
    }
}

impl Service<Uri> for Connector {
    type Response = DialedConnection;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        Box::pin(self.clone().connect(dst))
    }
}

fn configure_keepalive(stream: &TcpStream) -> io::Result<()> {
    let sock_ref = socket2::SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));

    sock_ref.set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)?;

    Ok(())
}

enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A dialed connection, plain or TLS, direct or tunneled.
pub struct DialedConnection {
    io: TokioIo<MaybeTlsStream>,
}

impl Connection for DialedConnection {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for DialedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.get_mut().io), cx, buf)
    }
}

impl hyper::rt::Write for DialedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.get_mut().io), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.get_mut().io), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.get_mut().io), cx)
    }
}
