use core::net::{IpAddr, SocketAddr};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use edge_http::Method;
use edge_http::io::client::Connection;
use edge_nal::{AddrType, Dns as _};
use edge_nal_embassy::{Dns, Tcp, TcpBuffers};

use embassy_net::Stack;

use embedded_io_async::Read;

use log::debug;

use iotnode::emitter::{HttpClient, HttpResponse};
use iotnode::uri::request_target;

use crate::error::{Error, ErrorKind, Result};

// Socket transmission buffer size.
const TX_SIZE: usize = 1024;
// Socket reception buffer size.
const RX_SIZE: usize = 1024;
// Connection buffer size, it holds the request and the response headers.
const CONNECTION_BUFFER_SIZE: usize = 2048;
// Maximum number of response headers.
const MAXIMUM_HEADERS_COUNT: usize = 16;
// Maximum number of body bytes kept from a response.
const MAXIMUM_BODY_SIZE: usize = 1024;

// A resolved collector.
struct Remote {
    address: SocketAddr,
    host: String,
}

/// An [`HttpClient`] which sends requests over an `edge-http` connection.
///
/// A single socket is available, so requests are sent one at a time.
pub struct EdgeClient {
    tcp: Tcp<'static, 1, TX_SIZE, RX_SIZE>,
    dns: Dns<'static>,
    buffer: Vec<u8>,
    remote: Option<Remote>,
}

impl EdgeClient {
    /// Creates an [`EdgeClient`] over the given network stack.
    #[must_use]
    pub fn new(stack: Stack<'static>) -> Self {
        let buffers = Box::leak(Box::new(TcpBuffers::<1, TX_SIZE, RX_SIZE>::new()));

        Self {
            tcp: Tcp::new(stack, buffers),
            dns: Dns::new(stack),
            buffer: vec![0; CONNECTION_BUFFER_SIZE],
            remote: None,
        }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(address);
        }

        self.dns
            .get_host_by_name(host, AddrType::IPv4)
            .await
            .map_err(|e| Error::new(ErrorKind::Dns, alloc::format!("`{host}`: {e:?}")))
    }
}

impl HttpClient for EdgeClient {
    type Error = Error;

    async fn connect(&mut self, authority: &str) -> Result<()> {
        let (host, port) = authority
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidAuthority,
                    alloc::format!("`{authority}` is not a `host:port` pair."),
                )
            })?;

        let address = SocketAddr::new(self.resolve(host).await?, port);
        debug!("Collector `{authority}` resolved to `{address}`.");

        self.remote = Some(Remote {
            address,
            host: host.into(),
        });

        Ok(())
    }

    async fn get(&mut self, url: &str) -> Result<HttpResponse> {
        let Some(remote) = &self.remote else {
            return Err(Error::new(ErrorKind::Http, "No collector connection."));
        };

        let mut conn: Connection<'_, _, MAXIMUM_HEADERS_COUNT> =
            Connection::new(&mut self.buffer, &self.tcp, remote.address);

        conn.initiate_request(
            true,
            Method::Get,
            &request_target(url),
            &[("Host", remote.host.as_str()), ("Connection", "close")],
        )
        .await?;
        conn.initiate_response().await?;

        let status = conn.headers()?.code;

        let mut body = Vec::new();
        let mut chunk = [0; 256];
        loop {
            let len = conn.read(&mut chunk).await?;
            if len == 0 {
                break;
            }
            let len = len.min(MAXIMUM_BODY_SIZE - body.len());
            body.extend_from_slice(&chunk[..len]);
            if body.len() == MAXIMUM_BODY_SIZE {
                debug!("Response body truncated to {MAXIMUM_BODY_SIZE} bytes.");
                break;
            }
        }

        Ok(HttpResponse::new(status, String::from_utf8_lossy(&body)))
    }

    async fn disconnect(&mut self) {
        self.remote = None;
    }
}
