//! [`TcpLink`] — blocking Modbus/TCP [`DeviceLink`].

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

// ---

use regpoll_domain::{DeviceLink, ErrorCode, TransactionRequest};

// ---

use super::error::TransportError;
use super::framing::{decode_response, encode_pdu, read_adu, write_adu};

// ---------------------------------------------------------------------------
// TcpLink
// ---------------------------------------------------------------------------

pub struct TcpLink {
    // ---
    stream: TcpStream,
    peer: SocketAddr,
    next_txn: u16,
}

// ---

impl TcpLink {
    // ---
    /// Connect to `addr`, bounding the connect and every read/write by
    /// `timeout`.
    pub fn connect<A>(addr: A, timeout: Duration) -> Result<Self, TransportError>
    where
        A: ToSocketAddrs,
    {
        // ---
        let mut last_err = None;
        for peer in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&peer, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    tracing::info!(%peer, "device connected");
                    return Ok(Self {
                        stream,
                        peer,
                        next_txn: 0,
                    });
                }
                Err(e) => {
                    tracing::debug!(%peer, "connect failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .map(TransportError::Io)
            .unwrap_or_else(|| TransportError::Malformed("address resolved to nothing".into())))
    }

    // ---

    fn transact(&mut self, request: &TransactionRequest) -> Result<Vec<u16>, TransportError> {
        // ---
        self.next_txn = self.next_txn.wrapping_add(1);
        let txn_id = self.next_txn;

        let pdu = encode_pdu(request)?;
        write_adu(&mut self.stream, txn_id, request.node(), &pdu)?;
        let response = read_adu(&mut self.stream, txn_id)?;
        decode_response(request, &response)
    }
}

// ---

impl DeviceLink for TcpLink {
    // ---
    fn execute(&mut self, request: &TransactionRequest) -> Result<Vec<u16>, ErrorCode> {
        // ---
        self.transact(request).map_err(|e| {
            tracing::debug!(peer = %self.peer, "transaction failed: {e}");
            e.code()
        })
    }

    fn close(&mut self) {
        // ---
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Both) {
            tracing::debug!(peer = %self.peer, "shutdown: {e}");
        }
        tracing::info!(peer = %self.peer, "device disconnected");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
