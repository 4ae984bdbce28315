//! Discovery handshake on the reliable socket.
//!
//! The first exchange of a session: the client announces itself and its
//! capabilities, the server answers with the negotiated ports, the rolled
//! connection id and the audio format. Envelopes are JSON with sealed
//! bodies, so the frame lengths are visible to the stream reader but the
//! contents are authenticated under the session key.

use serde::{Deserialize, Serialize};

use crate::cipher::PacketCipher;
use crate::error::{SessionError, SocketError};
use crate::socket::BulkSocket;

/// Client hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub user_id: u64,
    pub capabilities: Vec<String>,
}

/// Server answer carrying everything the client needs to open the media
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub client_id: u32,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub connection_id: u32,
    pub audio_sample_rate: u32,
}

fn send_sealed<T: Serialize>(
    socket: &mut BulkSocket,
    cipher: &PacketCipher,
    message: &T,
) -> Result<(), SessionError> {
    let json = serde_json::to_vec(message)
        .map_err(|e| SessionError::HandshakeFailed(format!("encode: {e}")))?;
    socket.send_framed(&cipher.seal_datagram(&json))?;
    Ok(())
}

fn recv_sealed<T: for<'de> Deserialize<'de>>(
    socket: &mut BulkSocket,
    cipher: &PacketCipher,
) -> Result<T, SessionError> {
    let frame = socket.recv_framed().map_err(|e| match e {
        SocketError::Timeout => SessionError::HandshakeFailed("peer silent".into()),
        other => SessionError::Socket(other),
    })?;
    let json = cipher.open_datagram(&frame)?;
    serde_json::from_slice(&json)
        .map_err(|e| SessionError::HandshakeFailed(format!("decode: {e}")))
}

/// Send the client hello.
pub fn send_request(
    socket: &mut BulkSocket,
    cipher: &PacketCipher,
    request: &DiscoveryRequest,
) -> Result<(), SessionError> {
    send_sealed(socket, cipher, request)
}

/// Receive the client hello (server side).
pub fn recv_request(
    socket: &mut BulkSocket,
    cipher: &PacketCipher,
) -> Result<DiscoveryRequest, SessionError> {
    recv_sealed(socket, cipher)
}

/// Send the server answer.
pub fn send_reply(
    socket: &mut BulkSocket,
    cipher: &PacketCipher,
    reply: &DiscoveryReply,
) -> Result<(), SessionError> {
    send_sealed(socket, cipher, reply)
}

/// Receive the server answer (client side).
pub fn recv_reply(
    socket: &mut BulkSocket,
    cipher: &PacketCipher,
) -> Result<DiscoveryReply, SessionError> {
    recv_sealed(socket, cipher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KEY_SIZE;
    use crate::socket::{BulkListener, RecvTimeout};
    use std::time::Duration;

    fn request() -> DiscoveryRequest {
        DiscoveryRequest {
            user_id: 42,
            capabilities: vec!["video".into(), "audio".into(), "clipboard".into()],
        }
    }

    #[test]
    fn test_handshake_roundtrip() {
        let cipher = PacketCipher::new([3u8; KEY_SIZE]);
        let listener = BulkListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client_cipher = cipher.clone();
        let client = std::thread::spawn(move || {
            let mut socket = BulkSocket::connect(addr, Duration::from_secs(1)).unwrap();
            socket.set_timeout(RecvTimeout::After(Duration::from_secs(1))).unwrap();
            send_request(&mut socket, &client_cipher, &request()).unwrap();
            recv_reply(&mut socket, &client_cipher).unwrap()
        });

        let (mut server, _) = listener.accept_timeout(Duration::from_secs(1)).unwrap();
        server.set_timeout(RecvTimeout::After(Duration::from_secs(1))).unwrap();
        let received = recv_request(&mut server, &cipher).unwrap();
        assert_eq!(received, request());

        let reply = DiscoveryReply {
            client_id: 1,
            udp_port: 9000,
            tcp_port: 9001,
            connection_id: 0xDEADBEEF,
            audio_sample_rate: 44_100,
        };
        send_reply(&mut server, &cipher, &reply).unwrap();

        assert_eq!(client.join().unwrap(), reply);
    }

    #[test]
    fn test_handshake_rejects_wrong_key() {
        let cipher = PacketCipher::new([3u8; KEY_SIZE]);
        let wrong = PacketCipher::new([4u8; KEY_SIZE]);
        let listener = BulkListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut socket = BulkSocket::connect(addr, Duration::from_secs(1)).unwrap();
            send_request(&mut socket, &wrong, &request()).unwrap();
            socket
        });

        let (mut server, _) = listener.accept_timeout(Duration::from_secs(1)).unwrap();
        server.set_timeout(RecvTimeout::After(Duration::from_secs(1))).unwrap();
        assert!(matches!(
            recv_request(&mut server, &cipher),
            Err(SessionError::Cipher(_))
        ));
        drop(client.join().unwrap());
    }
}
