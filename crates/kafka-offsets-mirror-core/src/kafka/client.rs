//! Kafka client for protocol-level communication with a single broker.

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader};
use kafka_protocol::protocol::StrBytes;
use kafka_protocol::protocol::{Decodable, Encodable};
use socket2::{SockRef, TcpKeepalive};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use crate::config::{KafkaConfig, SaslMechanism};
use crate::error::KafkaError;
use crate::Result;

/// Kafka client holding one connection to one broker.
///
/// The connection is (re)established lazily. A request whose future was
/// dropped before its response was read leaves the stream mid-frame, so such a
/// connection is discarded and replaced on the next request.
pub struct KafkaClient {
    config: KafkaConfig,
    connection: Mutex<Option<BrokerConnection>>,
    correlation_id: AtomicI32,
}

/// A stream that can be either plain TCP or TLS-wrapped
enum ConnectionStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ConnectionStream {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(s) => s.read_exact(buf).await.map(|_| ()),
            ConnectionStream::Tls(s) => s.read_exact(buf).await.map(|_| ()),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(s) => s.write_all(buf).await,
            ConnectionStream::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            ConnectionStream::Plain(s) => s.shutdown().await,
            ConnectionStream::Tls(s) => s.shutdown().await,
        }
    }
}

struct BrokerConnection {
    stream: ConnectionStream,
    address: String,
    /// Set while a request is written but its response not fully read
    in_flight: bool,
}

impl KafkaClient {
    /// Create a new, not yet connected client
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            correlation_id: AtomicI32::new(1),
        }
    }

    /// Create a client bound to one broker address, sharing security settings
    pub fn for_broker(config: &KafkaConfig, address: String) -> Self {
        let mut broker_config = config.clone();
        broker_config.bootstrap_servers = vec![address];
        Self::new(broker_config)
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Connect eagerly, failing if no configured server is reachable
    pub async fn connect(&self) -> Result<()> {
        let connection = self.establish().await?;
        let mut guard = self.connection.lock().await;
        *guard = Some(connection);
        Ok(())
    }

    /// Close the connection, if any
    pub async fn disconnect(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if let Some(mut connection) = guard.take() {
            debug!("Closing connection to {}", connection.address);
            connection.stream.shutdown().await?;
        }
        Ok(())
    }

    async fn establish(&self) -> Result<BrokerConnection> {
        // Try each bootstrap server until one connects
        for server in &self.config.bootstrap_servers {
            match self.try_connect(server).await {
                Ok(stream) => {
                    let mut connection = BrokerConnection {
                        stream,
                        address: server.clone(),
                        in_flight: false,
                    };

                    if self.config.security.security_protocol.uses_sasl() {
                        self.authenticate(&mut connection).await?;
                    }

                    debug!("Connected to Kafka broker: {}", server);
                    return Ok(connection);
                }
                Err(e) => {
                    debug!("Failed to connect to {}: {}", server, e);
                    continue;
                }
            }
        }

        Err(KafkaError::NoBrokersAvailable.into())
    }

    async fn try_connect(&self, server: &str) -> Result<ConnectionStream> {
        let tcp_stream =
            TcpStream::connect(server)
                .await
                .map_err(|e| KafkaError::ConnectionFailed {
                    broker: server.to_string(),
                    message: e.to_string(),
                })?;

        self.configure_socket(&tcp_stream, server)?;

        if !self.config.security.security_protocol.uses_tls() {
            return Ok(ConnectionStream::Plain(tcp_stream));
        }

        debug!("Establishing TLS connection to {}", server);
        let tls_config = super::tls::build_tls_config(&self.config.security)?;
        let connector = TlsConnector::from(Arc::new(tls_config));

        let hostname = server.split(':').next().unwrap_or(server);
        let server_name = ServerName::try_from(hostname.to_string()).map_err(|e| {
            KafkaError::ConnectionFailed {
                broker: server.to_string(),
                message: format!("Invalid server name for TLS: {}", e),
            }
        })?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| KafkaError::ConnectionFailed {
                broker: server.to_string(),
                message: format!("TLS handshake failed: {}", e),
            })?;

        Ok(ConnectionStream::Tls(Box::new(tls_stream)))
    }

    /// Configure TCP socket options (keepalive, nodelay) based on connection config.
    fn configure_socket(&self, stream: &TcpStream, server: &str) -> Result<()> {
        let conn_config = &self.config.connection;
        let sock_ref = SockRef::from(stream);

        if conn_config.tcp_nodelay {
            sock_ref
                .set_nodelay(true)
                .map_err(|e| KafkaError::ConnectionFailed {
                    broker: server.to_string(),
                    message: format!("Failed to set TCP_NODELAY: {}", e),
                })?;
        }

        if conn_config.tcp_keepalive {
            let keepalive = TcpKeepalive::new()
                .with_time(Duration::from_secs(conn_config.keepalive_time_secs))
                .with_interval(Duration::from_secs(conn_config.keepalive_interval_secs));

            sock_ref
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| KafkaError::ConnectionFailed {
                    broker: server.to_string(),
                    message: format!("Failed to set TCP keepalive: {}", e),
                })?;
        }

        Ok(())
    }

    async fn authenticate(&self, connection: &mut BrokerConnection) -> Result<()> {
        let security = &self.config.security;

        match security.sasl_mechanism {
            Some(SaslMechanism::Plain) => {
                self.sasl_plain_auth(
                    connection,
                    security.sasl_username.as_deref().unwrap_or(""),
                    security.sasl_password.as_deref().unwrap_or(""),
                )
                .await
            }
            None => Err(crate::Error::Authentication(
                "SASL security protocol configured without a mechanism".to_string(),
            )),
        }
    }

    async fn sasl_plain_auth(
        &self,
        connection: &mut BrokerConnection,
        username: &str,
        password: &str,
    ) -> Result<()> {
        use kafka_protocol::messages::{
            SaslAuthenticateRequest, SaslAuthenticateResponse, SaslHandshakeRequest,
            SaslHandshakeResponse,
        };

        let handshake_request = SaslHandshakeRequest::default().with_mechanism("PLAIN".into());
        let handshake_response: SaslHandshakeResponse = self
            .roundtrip(connection, ApiKey::SaslHandshake, handshake_request)
            .await?;
        if handshake_response.error_code != 0 {
            return Err(crate::Error::Authentication(format!(
                "SASL handshake rejected PLAIN: error code {}",
                handshake_response.error_code
            )));
        }

        // PLAIN format: \0username\0password
        let mut auth_bytes = Vec::with_capacity(2 + username.len() + password.len());
        auth_bytes.push(0);
        auth_bytes.extend_from_slice(username.as_bytes());
        auth_bytes.push(0);
        auth_bytes.extend_from_slice(password.as_bytes());

        let auth_request =
            SaslAuthenticateRequest::default().with_auth_bytes(Bytes::from(auth_bytes));
        let auth_response: SaslAuthenticateResponse = self
            .roundtrip(connection, ApiKey::SaslAuthenticate, auth_request)
            .await?;

        if auth_response.error_code != 0 {
            return Err(crate::Error::Authentication(format!(
                "SASL authentication failed: {}",
                auth_response
                    .error_message
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("error code {}", auth_response.error_code))
            )));
        }

        debug!("SASL PLAIN authentication successful");
        Ok(())
    }

    fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and receive its response, reconnecting if needed
    pub async fn send_request<Req, Resp>(&self, api_key: ApiKey, request: Req) -> Result<Resp>
    where
        Req: Encodable + Default,
        Resp: Decodable + Default,
    {
        let mut guard = self.connection.lock().await;

        let reusable = matches!(guard.as_ref(), Some(c) if !c.in_flight);
        if !reusable {
            if let Some(stale) = guard.as_ref() {
                warn!(
                    "Discarding connection to {} with an interrupted request",
                    stale.address
                );
            }
            *guard = None;
            *guard = Some(self.establish().await?);
        }

        let connection = guard
            .as_mut()
            .ok_or_else(|| KafkaError::Protocol("Not connected".to_string()))?;

        self.roundtrip(connection, api_key, request).await
    }

    async fn roundtrip<Req, Resp>(
        &self,
        connection: &mut BrokerConnection,
        api_key: ApiKey,
        request: Req,
    ) -> Result<Resp>
    where
        Req: Encodable + Default,
        Resp: Decodable + Default,
    {
        let correlation_id = self.next_correlation_id();
        let api_version = api_version(api_key);

        let header = RequestHeader::default()
            .with_request_api_key(api_key as i16)
            .with_request_api_version(api_version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(StrBytes::from_string(self.config.client_id.clone())));

        let header_version = api_key.request_header_version(api_version);
        let mut buf = BytesMut::new();

        // Length prefix, patched below
        buf.put_i32(0);

        header
            .encode(&mut buf, header_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to encode header: {:?}", e)))?;
        request
            .encode(&mut buf, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to encode request: {:?}", e)))?;

        let len = (buf.len() - 4) as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());

        trace!(
            "Sending request to {}: api_key={:?}, api_version={}, correlation_id={}, len={}",
            connection.address,
            api_key,
            api_version,
            correlation_id,
            len
        );

        connection.in_flight = true;

        connection
            .stream
            .write_all(&buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to send request: {}", e)))?;

        let mut len_buf = [0u8; 4];
        connection
            .stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to read response length: {}", e)))?;
        let response_len = i32::from_be_bytes(len_buf);
        if response_len < 0 {
            return Err(
                KafkaError::Protocol(format!("Invalid response length {}", response_len)).into(),
            );
        }

        let mut response_buf = vec![0u8; response_len as usize];
        connection
            .stream
            .read_exact(&mut response_buf)
            .await
            .map_err(|e| KafkaError::Protocol(format!("Failed to read response body: {}", e)))?;

        let mut response_bytes = Bytes::from(response_buf);
        let response_header_version = api_key.response_header_version(api_version);
        let response_header = ResponseHeader::decode(&mut response_bytes, response_header_version)
            .map_err(|e| {
                KafkaError::Protocol(format!("Failed to decode response header: {:?}", e))
            })?;

        if response_header.correlation_id != correlation_id {
            // Leave the connection marked in flight so it gets replaced.
            return Err(KafkaError::Protocol(format!(
                "Correlation id mismatch: expected {}, got {}",
                correlation_id, response_header.correlation_id
            ))
            .into());
        }

        connection.in_flight = false;

        let response = Resp::decode(&mut response_bytes, api_version)
            .map_err(|e| KafkaError::Protocol(format!("Failed to decode response: {:?}", e)))?;

        Ok(response)
    }
}

/// API version used for each request type
fn api_version(api_key: ApiKey) -> i16 {
    match api_key {
        ApiKey::Metadata => 9,
        ApiKey::Fetch => 11,
        ApiKey::Produce => 8,
        ApiKey::ListOffsets => 5,
        ApiKey::FindCoordinator => 2,
        ApiKey::OffsetCommit => 2,
        ApiKey::OffsetFetch => 3,
        ApiKey::SaslHandshake => 1,
        ApiKey::SaslAuthenticate => 2,
        ApiKey::ApiVersions => 3,
        _ => 0,
    }
}
