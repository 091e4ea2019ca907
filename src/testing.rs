//! Test doubles: an in-memory datagram socket and response builders.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::header::{Division, HEADER_SIZE, MAGIC};
use crate::transport::DatagramSocket;

/// Builds a file division response datagram.
pub(crate) fn response(request_id: u8, status: u8, block_number: u32, payload: &[u8]) -> Vec<u8> {
    response_in(Division::File, request_id, status, block_number, payload)
}

/// Builds a response datagram for the given division.
pub(crate) fn response_in(
    division: Division,
    request_id: u8,
    status: u8,
    block_number: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(HEADER_SIZE + payload.len());
    datagram.extend_from_slice(MAGIC);
    datagram.extend_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
    datagram.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    datagram.push(3);
    datagram.push(division.code());
    datagram.push(1);
    datagram.push(request_id);
    datagram.extend_from_slice(&block_number.to_le_bytes());
    datagram.extend_from_slice(b"99999999");
    datagram.push(0x80);
    datagram.push(status);
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(&u16::from(status).to_le_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}

/// In-memory socket driven by a [`MockController`].
pub(crate) struct MockSocket {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<Vec<u8>>>>,
    sent: mpsc::UnboundedSender<Vec<u8>>,
    fail_sends: Arc<AtomicBool>,
}

/// The remote end of a [`MockSocket`].
pub(crate) struct MockController {
    inbound: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    fail_sends: Arc<AtomicBool>,
}

pub(crate) fn mock_pair() -> (MockSocket, MockController) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let fail_sends = Arc::new(AtomicBool::new(false));
    (
        MockSocket {
            inbound: tokio::sync::Mutex::new(inbound_rx),
            sent: sent_tx,
            fail_sends: Arc::clone(&fail_sends),
        },
        MockController {
            inbound: inbound_tx,
            sent: sent_rx,
            fail_sends,
        },
    )
}

impl MockController {
    /// Delivers a datagram to the socket.
    pub(crate) fn inject(&self, datagram: Vec<u8>) {
        let _ = self.inbound.send(Ok(datagram));
    }

    /// Makes the next pending `recv` fail.
    pub(crate) fn inject_error(&self, kind: io::ErrorKind) {
        let _ = self.inbound.send(Err(io::Error::new(kind, "injected")));
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Waits for the next datagram sent by the client.
    pub(crate) async fn next_sent(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("timed out waiting for a sent datagram")
            .expect("socket dropped")
    }

    pub(crate) fn try_next_sent(&mut self) -> Option<Vec<u8>> {
        self.sent.try_recv().ok()
    }
}

impl DatagramSocket for MockSocket {
    async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Ok(datagram)) => {
                let size = datagram.len().min(buffer.len());
                buffer[..size].copy_from_slice(&datagram[..size]);
                Ok(size)
            }
            Some(Err(error)) => Err(error),
            None => std::future::pending().await,
        }
    }

    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "injected"));
        }
        let _ = self.sent.send(datagram.to_vec());
        Ok(datagram.len())
    }
}

/// Waits for the next item on a test channel.
pub(crate) async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed")
}
