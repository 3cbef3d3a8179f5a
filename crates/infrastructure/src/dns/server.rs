use crate::dns::clock::CoarseClock;
use crate::dns::engine::{ForwardEngine, CONNECTION_TIMEOUT};
use crate::dns::pool::UpstreamPool;
use crate::dns::refresh::RefreshWorker;
use crate::dns::transport::{read_with_length_prefix, send_with_length_prefix};
use hickory_proto::op::{Message, MessageType, ResponseCode};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use veil_dns_domain::DomainError;

/// How often the coarse clock re-reads the wall clock.
const TIMER_RESOLUTION: Duration = Duration::from_secs(1);
/// Minimum UDP payload every DNS client must accept.
const MIN_UDP_PAYLOAD: usize = 512;

/// UDP + TCP DNS front end. Owns the long-lived tasks: listeners, the
/// refresh worker and the clock ticker; winds all of them down and drains
/// the upstream pools on cancellation.
pub struct DnsServer {
    listen: SocketAddr,
    engine: Arc<ForwardEngine>,
    pools: Vec<Arc<UpstreamPool>>,
    clock: Arc<CoarseClock>,
    refresh_rx: mpsc::Receiver<Message>,
}

impl DnsServer {
    pub fn new(
        listen: SocketAddr,
        engine: Arc<ForwardEngine>,
        pools: Vec<Arc<UpstreamPool>>,
        clock: Arc<CoarseClock>,
        refresh_rx: mpsc::Receiver<Message>,
    ) -> Self {
        Self {
            listen,
            engine,
            pools,
            clock,
            refresh_rx,
        }
    }

    /// Runs until `shutdown` is cancelled. Bind failures are fatal and
    /// returned immediately.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DomainError> {
        let udp = Arc::new(bind_udp(self.listen)?);
        let tcp = bind_tcp(self.listen)?;
        info!(
            listen = %self.listen,
            upstreams = self.pools.len(),
            "DNS-over-TLS forwarder listening"
        );

        let clock = Arc::clone(&self.clock);
        let ticker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMER_RESOLUTION);
            loop {
                tokio::select! {
                    _ = ticker_shutdown.cancelled() => break,
                    _ = interval.tick() => clock.tick(),
                }
            }
        });

        let worker = RefreshWorker::new(
            Arc::clone(&self.engine),
            self.refresh_rx,
            shutdown.clone(),
        );
        tokio::spawn(worker.run());

        let udp_task = tokio::spawn(udp_loop(
            udp,
            Arc::clone(&self.engine),
            shutdown.clone(),
        ));
        let tcp_task = tokio::spawn(tcp_loop(
            tcp,
            Arc::clone(&self.engine),
            shutdown.clone(),
        ));

        let _ = udp_task.await;
        let _ = tcp_task.await;

        for pool in &self.pools {
            pool.shutdown();
        }
        info!("shutdown complete");
        Ok(())
    }
}

async fn udp_loop(socket: Arc<UdpSocket>, engine: Arc<ForwardEngine>, shutdown: CancellationToken) {
    let mut recv_buf = [0u8; 4096];
    loop {
        let (n, from) = tokio::select! {
            _ = shutdown.cancelled() => break,
            recv = socket.recv_from(&mut recv_buf) => match recv {
                Ok(x) => x,
                Err(e) => {
                    error!(error = %e, "UDP recv error");
                    continue;
                }
            },
        };
        let query = match Message::from_vec(&recv_buf[..n]) {
            Ok(query) => query,
            Err(e) => {
                debug!(client = %from, error = %e, "dropping unparseable UDP query");
                continue;
            }
        };
        let engine = Arc::clone(&engine);
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            handle_udp_query(socket, engine, query, from).await;
        });
    }
}

async fn handle_udp_query(
    socket: Arc<UdpSocket>,
    engine: Arc<ForwardEngine>,
    query: Message,
    from: SocketAddr,
) {
    let response = match engine.answer(&query).await {
        Some(response) => response,
        None => servfail_reply(&query),
    };
    let wire = match encode_udp_response(&response, client_udp_payload(&query)) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(client = %from, error = %e, "failed to serialize UDP response");
            return;
        }
    };
    if let Err(e) = socket.send_to(&wire, from).await {
        // The client will re-query; nothing to retry here.
        warn!(client = %from, error = %e, "failed to write UDP response");
    }
}

async fn tcp_loop(listener: TcpListener, engine: Arc<ForwardEngine>, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(x) => x,
                Err(e) => {
                    error!(error = %e, "TCP accept error");
                    continue;
                }
            },
        };
        let engine = Arc::clone(&engine);
        let conn_shutdown = shutdown.clone();
        tokio::spawn(async move {
            serve_tcp_client(stream, peer, engine, conn_shutdown).await;
        });
    }
}

/// Serves queries on one client connection until EOF, an idle timeout, a
/// framing error or shutdown.
async fn serve_tcp_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<ForwardEngine>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = tokio::time::timeout(CONNECTION_TIMEOUT, read_with_length_prefix(&mut stream)) => frame,
        };
        let bytes = match frame {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                debug!(client = %peer, error = %e, "closing TCP client");
                return;
            }
            Err(_) => {
                debug!(client = %peer, "TCP client idle, closing");
                return;
            }
        };
        let query = match Message::from_vec(&bytes) {
            Ok(query) => query,
            Err(e) => {
                debug!(client = %peer, error = %e, "dropping unparseable TCP query");
                return;
            }
        };
        let response = match engine.answer(&query).await {
            Some(response) => response,
            None => servfail_reply(&query),
        };
        let wire = match response.to_vec() {
            Ok(wire) => wire,
            Err(e) => {
                warn!(client = %peer, error = %e, "failed to serialize TCP response");
                return;
            }
        };
        if let Err(e) = send_with_length_prefix(&mut stream, &wire).await {
            debug!(client = %peer, error = %e, "failed to write TCP response");
            return;
        }
    }
}

/// Synthesizes the standard failure reply: the client's ID and question
/// echoed back with rcode SERVFAIL.
pub fn servfail_reply(query: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(query.op_code());
    response.set_recursion_desired(query.recursion_desired());
    response.set_recursion_available(true);
    response.set_response_code(ResponseCode::ServFail);
    response.add_queries(query.queries().to_vec());
    response
}

/// Largest UDP response the client advertised it accepts (512 without EDNS).
fn client_udp_payload(query: &Message) -> usize {
    query
        .extensions()
        .as_ref()
        .map(|edns| edns.max_payload() as usize)
        .unwrap_or(MIN_UDP_PAYLOAD)
        .max(MIN_UDP_PAYLOAD)
}

/// Emits the response, replacing it with an empty truncated reply when it
/// exceeds the client's payload limit so the client retries over TCP.
fn encode_udp_response(response: &Message, max_size: usize) -> Result<Vec<u8>, DomainError> {
    let wire = response
        .to_vec()
        .map_err(|e| DomainError::InvalidDnsMessage(e.to_string()))?;
    if wire.len() <= max_size {
        return Ok(wire);
    }
    let mut truncated = Message::new();
    truncated.set_id(response.id());
    truncated.set_message_type(MessageType::Response);
    truncated.set_op_code(response.op_code());
    truncated.set_recursion_desired(response.recursion_desired());
    truncated.set_recursion_available(true);
    truncated.set_response_code(response.response_code());
    truncated.set_truncated(true);
    truncated.add_queries(response.queries().to_vec());
    truncated
        .to_vec()
        .map_err(|e| DomainError::InvalidDnsMessage(e.to_string()))
}

fn bind_udp(addr: SocketAddr) -> Result<UdpSocket, DomainError> {
    let bind_err = |e: std::io::Error| DomainError::BindFailure {
        addr: addr.to_string(),
        reason: e.to_string(),
    };
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_recv_buffer_size(8 * 1024 * 1024).map_err(bind_err)?;
    socket.set_send_buffer_size(4 * 1024 * 1024).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_err)
}

fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, DomainError> {
    let bind_err = |e: std::io::Error| DomainError::BindFailure {
        addr: addr.to_string(),
        reason: e.to_string(),
    };
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1024).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(bind_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{OpCode, Query};
    use hickory_proto::rr::{DNSClass, Name, RecordType};
    use std::str::FromStr;

    fn sample_query() -> Message {
        let mut query = Message::new();
        query.set_id(0x1234);
        query.set_message_type(MessageType::Query);
        query.set_op_code(OpCode::Query);
        query.set_recursion_desired(true);
        let mut q = Query::new();
        q.set_name(Name::from_str("example.com.").unwrap());
        q.set_query_type(RecordType::A);
        q.set_query_class(DNSClass::IN);
        query.add_query(q);
        query
    }

    #[test]
    fn test_servfail_reply_echoes_id_and_question() {
        let query = sample_query();
        let reply = servfail_reply(&query);
        assert_eq!(reply.id(), 0x1234);
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.queries(), query.queries());
    }

    #[test]
    fn test_udp_payload_defaults_to_512_without_edns() {
        assert_eq!(client_udp_payload(&sample_query()), MIN_UDP_PAYLOAD);
    }

    #[test]
    fn test_oversized_udp_response_is_truncated() {
        use hickory_proto::rr::rdata::TXT;
        use hickory_proto::rr::{RData, Record};

        let mut response = sample_query();
        response.set_message_type(MessageType::Response);
        let name = Name::from_str("example.com.").unwrap();
        for _ in 0..16 {
            let txt = TXT::new(vec!["x".repeat(200)]);
            response.add_answer(Record::from_rdata(name.clone(), 60, RData::TXT(txt)));
        }
        let wire = encode_udp_response(&response, MIN_UDP_PAYLOAD).unwrap();
        assert!(wire.len() <= MIN_UDP_PAYLOAD);
        let parsed = Message::from_vec(&wire).unwrap();
        assert!(parsed.truncated());
        assert!(parsed.answers().is_empty());
        assert_eq!(parsed.id(), 0x1234);
    }
}
