//! Transport provider — listening, dialing, and protocol negotiation.
//!
//! A [`Transport`] produces bidirectional, ordered byte streams. Before any
//! Ferron traffic flows on a fresh stream, the dialer proposes an ordered list
//! of protocol identifiers and the listener answers with the first one it
//! serves, so Ferron traffic can share a transport node with other protocols.

use crate::connection::{read_frame, write_frame, WireError};
use crate::message::{ProtocolProposal, ProtocolSelection};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Any bidirectional byte stream a transport can hand out.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> AsyncStream for T {}

/// Owned, type-erased stream.
pub type BoxStream = Box<dyn AsyncStream>;

/// A bound listener producing inbound streams.
#[async_trait]
pub trait Listener: Send + 'static {
    /// The actual bound address (useful when binding to port 0).
    fn local_addr(&self) -> SocketAddr;

    /// Wait for the next inbound stream.
    async fn accept(&mut self) -> Result<(BoxStream, SocketAddr), WireError>;
}

/// Physical transport used by a node.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bind a listener on `addr`.
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, WireError>;

    /// Open a raw stream to `addr`.
    async fn dial(&self, addr: SocketAddr) -> Result<BoxStream, WireError>;
}

/// Plain TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

struct TcpNodeListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

#[async_trait]
impl Listener for TcpNodeListener {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn accept(&mut self) -> Result<(BoxStream, SocketAddr), WireError> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn Listener>, WireError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Box::new(TcpNodeListener {
            listener,
            local_addr,
        }))
    }

    async fn dial(&self, addr: SocketAddr) -> Result<BoxStream, WireError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Dialer side: propose `protocols` in preference order and return the one
/// the listener picked.
pub async fn negotiate_outbound<S>(
    stream: &mut S,
    protocols: &[String],
    max_size: u32,
) -> Result<String, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_frame(
        stream,
        &ProtocolProposal {
            protocols: protocols.to_vec(),
        },
    )
    .await?;
    let selection: ProtocolSelection = read_frame(stream, max_size).await?;
    match selection.protocol {
        Some(protocol) if protocols.contains(&protocol) => {
            debug!(protocol = %protocol, "Negotiated protocol");
            Ok(protocol)
        }
        Some(protocol) => Err(WireError::NegotiationFailed(format!(
            "listener selected unproposed protocol '{protocol}'"
        ))),
        None => Err(WireError::NegotiationFailed(format!(
            "none of {protocols:?} is supported by the listener"
        ))),
    }
}

/// Listener side: pick the first proposed protocol that is in `supported`.
pub async fn negotiate_inbound<S>(
    stream: &mut S,
    supported: &[String],
    max_size: u32,
) -> Result<String, WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let proposal: ProtocolProposal = read_frame(stream, max_size).await?;
    let chosen = proposal
        .protocols
        .iter()
        .find(|p| supported.contains(p))
        .cloned();
    write_frame(
        stream,
        &ProtocolSelection {
            protocol: chosen.clone(),
        },
    )
    .await?;
    chosen.ok_or_else(|| {
        WireError::NegotiationFailed(format!(
            "peer proposed {:?}, supported {:?}",
            proposal.protocols, supported
        ))
    })
}

/// Dial `addr` and negotiate one of `protocols` on the new stream.
pub async fn dial_protocol(
    transport: &dyn Transport,
    addr: SocketAddr,
    protocols: &[String],
    max_size: u32,
) -> Result<(BoxStream, String), WireError> {
    let mut stream = transport.dial(addr).await?;
    let protocol = negotiate_outbound(&mut stream, protocols, max_size).await?;
    Ok((stream, protocol))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = 1024 * 1024;

    #[tokio::test]
    async fn test_negotiation_picks_first_supported() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let dialer = tokio::spawn(async move {
            negotiate_outbound(
                &mut a,
                &["/other/2.0".to_string(), "/ferron/1.0.0".to_string()],
                MAX,
            )
            .await
        });
        let chosen = negotiate_inbound(&mut b, &["/ferron/1.0.0".to_string()], MAX)
            .await
            .unwrap();
        assert_eq!(chosen, "/ferron/1.0.0");
        assert_eq!(dialer.await.unwrap().unwrap(), "/ferron/1.0.0");
    }

    #[tokio::test]
    async fn test_negotiation_refused() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let dialer = tokio::spawn(async move {
            negotiate_outbound(&mut a, &["/other/2.0".to_string()], MAX).await
        });
        let inbound = negotiate_inbound(&mut b, &["/ferron/1.0.0".to_string()], MAX).await;
        assert!(matches!(inbound, Err(WireError::NegotiationFailed(_))));
        assert!(matches!(
            dialer.await.unwrap(),
            Err(WireError::NegotiationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_tcp_dial_protocol() {
        let transport = TcpTransport;
        let mut listener = transport
            .listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            negotiate_inbound(&mut stream, &["/ferron/1.0.0".to_string()], MAX).await
        });
        let (_stream, protocol) =
            dial_protocol(&transport, addr, &["/ferron/1.0.0".to_string()], MAX)
                .await
                .unwrap();
        assert_eq!(protocol, "/ferron/1.0.0");
        assert_eq!(server.await.unwrap().unwrap(), "/ferron/1.0.0");
    }
}
