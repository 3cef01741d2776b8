use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use coap_lite::{CoapRequest, MessageClass, MessageType, Packet};
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, trace, warn};
use pin_project::pin_project;
use rand::Rng;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::udp::UdpFramed;

use crate::request::{Request, Response};
use crate::transport::{ClientContext, Transport, TransportError};

/// Receive window for the single submission, taken from MAX_TRANSMIT_WAIT in the
/// [CoAP RFC](https://datatracker.ietf.org/doc/html/rfc7252#section-4.8.2).  This is the
/// transport's default; nothing above it configures a timeout.
pub const MAX_TRANSMIT_WAIT: Duration = Duration::from_secs(93);

const DEFAULT_COAP_PORT: u16 = 5683;
const TOKEN_LENGTH: usize = 8;

/// Default CoAP client transport as originally defined in RFC 7252.  Likely this is what you
/// want if you're new to CoAP.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpTransport;

impl UdpTransport {
    pub fn new() -> Self {
        UdpTransport
    }
}

#[async_trait]
impl Transport for UdpTransport {
    type Context = UdpClientContext;

    async fn open(&self) -> Result<UdpClientContext, TransportError> {
        // Wildcard dual-stack bind where the host supports it, plain IPv4 otherwise.
        let socket = match UdpSocket::bind(("::", 0)).await {
            Ok(socket) => socket,
            Err(_) => UdpSocket::bind(("0.0.0.0", 0)).await?,
        };
        let local_addr = socket.local_addr()?;
        debug!("Client context bound to {local_addr}");
        let binding = ClientBinding {
            framed_socket: UdpFramed::new(socket, Codec::default()),
            local_addr,
        };
        Ok(UdpClientContext { binding })
    }
}

/// Scoped client context over an ephemeral UDP socket.  Dropping it releases the socket.
pub struct UdpClientContext {
    binding: ClientBinding,
}

#[async_trait]
impl ClientContext for UdpClientContext {
    async fn submit(&mut self, request: &Request) -> Result<Response, TransportError> {
        let (authority, path) = split_uri(&request.uri)?;
        let (host, port) = split_authority(authority)?;
        let peer = resolve(&host, port).await?;
        let peer = align_families(peer, self.binding.local_addr);

        let mut outbound: CoapRequest<SocketAddr> = CoapRequest::new();
        outbound.set_method(request.method);
        outbound.set_path(path);
        if let Some(payload) = &request.payload {
            outbound.message.payload = payload.clone();
        }
        outbound.message.header.set_type(MessageType::Confirmable);
        outbound.message.header.message_id = rand::thread_rng().gen();
        let token = rand::thread_rng().gen::<[u8; TOKEN_LENGTH]>().to_vec();
        outbound.message.set_token(token.clone());

        trace!("Outgoing packet to {peer:?}: {:?}", outbound.message);
        self.binding.send((outbound.message, peer)).await?;

        time::timeout(MAX_TRANSMIT_WAIT, self.recv_matching(peer, &token))
            .await
            .map_err(|_elapsed| TransportError::Timeout)?
    }
}

impl UdpClientContext {
    /// Wait for the reply correlated to our token, skipping unrelated traffic.  Both
    /// piggybacked and separate responses land here; a separate Confirmable response is
    /// acknowledged before it is surfaced.
    async fn recv_matching(
        &mut self,
        peer: SocketAddr,
        token: &[u8],
    ) -> Result<Response, TransportError> {
        loop {
            let item = self
                .binding
                .next()
                .await
                .ok_or_else(|| TransportError::Unspecified("socket closed".to_string()))?;
            let (packet, source) = item?;
            trace!("Incoming packet from {source:?}: {packet:?}");
            if source != peer {
                trace!("Ignoring packet from unexpected source {source:?}");
                continue;
            }
            match packet.header.code {
                MessageClass::Response(status) => {
                    if packet.get_token()[..] != token[..] {
                        trace!("Ignoring reply with unmatched token from {source:?}");
                        continue;
                    }
                    if packet.header.get_type() == MessageType::Confirmable {
                        self.acknowledge(&packet, source).await?;
                    }
                    return Ok(Response {
                        status,
                        payload: packet.payload,
                    });
                }
                MessageClass::Empty => {
                    if packet.header.get_type() == MessageType::Reset {
                        return Err(TransportError::Unspecified(
                            "reset message received".to_string(),
                        ));
                    }
                    trace!("Empty ACK from {source:?}, awaiting separate response...");
                }
                n => {
                    warn!("Unhandled message code {n} from {source:?}, ignoring...");
                }
            }
        }
    }

    async fn acknowledge(&mut self, reply: &Packet, peer: SocketAddr) -> Result<(), TransportError> {
        let mut ack = Packet::new();
        ack.header.set_type(MessageType::Acknowledgement);
        ack.header.code = MessageClass::Empty;
        ack.header.message_id = reply.header.message_id;
        trace!(
            "Acknowledging separate response {} from {peer:?}",
            reply.header.message_id
        );
        self.binding.send((ack, peer)).await
    }
}

fn split_uri(uri: &str) -> Result<(&str, &str), TransportError> {
    let rest = uri
        .strip_prefix("coap://")
        .ok_or_else(|| TransportError::Unspecified(format!("unsupported URI scheme in {uri}")))?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(TransportError::Unspecified(format!("missing host in {uri}")));
    }
    Ok((authority, path))
}

fn split_authority(authority: &str) -> Result<(String, u16), TransportError> {
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| {
            TransportError::Unspecified(format!("unterminated IPv6 literal in {authority}"))
        })?;
        let host = rest[..end].to_string();
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(port) => parse_port(port, authority)?,
            None if rest[end + 1..].is_empty() => DEFAULT_COAP_PORT,
            None => {
                return Err(TransportError::Unspecified(format!(
                    "trailing garbage after IPv6 literal in {authority}"
                )))
            }
        };
        Ok((host, port))
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => Ok((host.to_string(), parse_port(port, authority)?)),
            None => Ok((authority.to_string(), DEFAULT_COAP_PORT)),
        }
    }
}

fn parse_port(port: &str, authority: &str) -> Result<u16, TransportError> {
    port.parse()
        .map_err(|_| TransportError::Unspecified(format!("invalid port in {authority}")))
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| TransportError::Unspecified(format!("no addresses found for {host}")))
}

/// An IPv4 peer reached through a dual-stack socket must be addressed in mapped form.
fn align_families(peer: SocketAddr, local: SocketAddr) -> SocketAddr {
    match (peer, local) {
        (SocketAddr::V4(v4), SocketAddr::V6(_)) => {
            SocketAddr::new(v4.ip().to_ipv6_mapped().into(), v4.port())
        }
        (peer, _) => peer,
    }
}

#[pin_project]
struct ClientBinding {
    #[pin]
    framed_socket: UdpFramed<Codec>,
    local_addr: SocketAddr,
}

impl Stream for ClientBinding {
    type Item = Result<(Packet, SocketAddr), TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().framed_socket.poll_next(cx)
    }
}

impl Sink<(Packet, SocketAddr)> for ClientBinding {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: (Packet, SocketAddr)) -> Result<(), Self::Error> {
        self.project().framed_socket.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_close(cx)
    }
}

#[derive(Default)]
struct Codec;

impl Decoder for Codec {
    type Item = Packet;
    type Error = TransportError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, TransportError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let result = (|| Ok(Some(Packet::from_bytes(buf)?)))();
        buf.clear();
        result
    }
}

impl Encoder<Packet> for Codec {
    type Error = TransportError;

    fn encode(&mut self, packet: Packet, buf: &mut BytesMut) -> Result<(), TransportError> {
        buf.extend_from_slice(&packet.to_bytes()?[..]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use coap_lite::{RequestType, ResponseType};

    use super::*;
    use crate::request::{Request, Target};

    #[test]
    fn split_uri_separates_authority_and_path() {
        let (authority, path) = split_uri("coap://example.org/nombre").unwrap();
        assert_eq!(authority, "example.org");
        assert_eq!(path, "nombre");
    }

    #[test]
    fn split_uri_without_path_yields_empty_path() {
        let (authority, path) = split_uri("coap://example.org").unwrap();
        assert_eq!(authority, "example.org");
        assert_eq!(path, "");
    }

    #[test]
    fn split_uri_rejects_other_schemes() {
        assert!(split_uri("http://example.org/nombre").is_err());
        assert!(split_uri("nombre").is_err());
    }

    #[test]
    fn split_authority_uses_default_port() {
        assert_eq!(
            split_authority("example.org").unwrap(),
            ("example.org".to_string(), DEFAULT_COAP_PORT)
        );
    }

    #[test]
    fn split_authority_parses_explicit_port() {
        assert_eq!(
            split_authority("192.168.8.92:5684").unwrap(),
            ("192.168.8.92".to_string(), 5684)
        );
    }

    #[test]
    fn split_authority_parses_bracketed_ipv6() {
        assert_eq!(
            split_authority("[fdce:77db::1]").unwrap(),
            ("fdce:77db::1".to_string(), DEFAULT_COAP_PORT)
        );
        assert_eq!(
            split_authority("[fdce:77db::1]:5684").unwrap(),
            ("fdce:77db::1".to_string(), 5684)
        );
    }

    #[test]
    fn split_authority_rejects_malformed_ipv6() {
        assert!(split_authority("[fdce:77db::1").is_err());
        assert!(split_authority("[fdce:77db::1]junk").is_err());
    }

    #[test]
    fn align_families_maps_v4_peers_onto_v6_sockets() {
        let peer: SocketAddr = "192.0.2.7:5683".parse().unwrap();
        let v6_local: SocketAddr = "[::]:0".parse().unwrap();
        assert_eq!(
            align_families(peer, v6_local),
            "[::ffff:192.0.2.7]:5683".parse::<SocketAddr>().unwrap()
        );

        let v4_local: SocketAddr = "0.0.0.0:0".parse().unwrap();
        assert_eq!(align_families(peer, v4_local), peer);
    }

    fn piggybacked_reply(request: &Packet, status: ResponseType, payload: &[u8]) -> Packet {
        let mut reply = Packet::new();
        reply.header.set_type(MessageType::Acknowledgement);
        reply.header.code = MessageClass::Response(status);
        reply.header.message_id = request.header.message_id;
        reply.set_token(request.get_token().to_vec());
        reply.payload = payload.to_vec();
        reply
    }

    async fn reply_once(socket: UdpSocket, replies: impl FnOnce(&Packet) -> Vec<Packet>) {
        let mut buf = [0u8; 1500];
        let (len, src) = socket.recv_from(&mut buf).await.unwrap();
        let request = Packet::from_bytes(&buf[..len]).unwrap();
        for reply in replies(&request) {
            socket.send_to(&reply.to_bytes().unwrap(), src).await.unwrap();
        }
    }

    async fn submit_get(port: u16) -> Response {
        let transport = UdpTransport::new();
        let mut context = transport.open().await.unwrap();
        let target = Target::new(format!("127.0.0.1:{port}"), "nombre");
        let request = Request::build(&target, RequestType::Get, None).unwrap();
        context.submit(&request).await.unwrap()
    }

    #[tokio::test]
    async fn loopback_get_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let serve = tokio::spawn(reply_once(server, |request| {
            assert!(matches!(
                request.header.code,
                MessageClass::Request(RequestType::Get)
            ));
            vec![piggybacked_reply(request, ResponseType::Content, b"Hector")]
        }));

        let response = submit_get(port).await;

        assert!(matches!(response.status, ResponseType::Content));
        assert_eq!(response.payload, b"Hector");
        serve.await.unwrap();
    }

    #[tokio::test]
    async fn loopback_skips_replies_with_unmatched_tokens() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let serve = tokio::spawn(reply_once(server, |request| {
            let mut bogus = piggybacked_reply(request, ResponseType::Content, b"wrong");
            bogus.set_token(b"deadbeef".to_vec());
            vec![
                bogus,
                piggybacked_reply(request, ResponseType::Content, b"Hector"),
            ]
        }));

        let response = submit_get(port).await;

        assert_eq!(response.payload, b"Hector");
        serve.await.unwrap();
    }

    #[tokio::test]
    async fn loopback_accepts_separate_response_after_empty_ack() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let serve = tokio::spawn(reply_once(server, |request| {
            let mut ack = Packet::new();
            ack.header.set_type(MessageType::Acknowledgement);
            ack.header.code = MessageClass::Empty;
            ack.header.message_id = request.header.message_id;

            let mut con = Packet::new();
            con.header.set_type(MessageType::Confirmable);
            con.header.code = MessageClass::Response(ResponseType::Content);
            con.header.message_id = 0x1234;
            con.set_token(request.get_token().to_vec());
            con.payload = b"Hector".to_vec();

            vec![ack, con]
        }));

        let response = submit_get(port).await;

        assert!(matches!(response.status, ResponseType::Content));
        assert_eq!(response.payload, b"Hector");
        serve.await.unwrap();
    }
}
