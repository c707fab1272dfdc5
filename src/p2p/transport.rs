use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::p2p::codec::{JsonCodec, Request, Response};

/// Deadline applied to connect, send and receive on every exchange.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

fn connect(address: &str) -> Option<TcpStream> {
    let socket_address = match address.to_socket_addrs() {
        Ok(mut addresses) => addresses.next()?,
        Err(e) => {
            debug!("Failed to resolve {:?}: {:?}", address, e);
            return None;
        }
    };

    match TcpStream::connect_timeout(&socket_address, SOCKET_TIMEOUT) {
        Ok(stream) => {
            stream.set_read_timeout(Some(SOCKET_TIMEOUT)).ok()?;
            stream.set_write_timeout(Some(SOCKET_TIMEOUT)).ok()?;
            Some(stream)
        }
        Err(e) => {
            debug!("Failed to connect to {:?}: {:?}", address, e);
            None
        }
    }
}

fn write_request(stream: &mut TcpStream, request: &Request) -> Option<()> {
    let mut line = JsonCodec::encode(request)?;
    line.push('\n');

    if let Err(e) = stream.write_all(line.as_bytes()).and_then(|_| stream.flush()) {
        debug!("Failed to send request: {:?}", e);
        return None;
    }

    Some(())
}

/// Send one request and wait for the single-line reply.
///
/// Any failure along the way (resolution, connect, timeout, malformed
/// reply) collapses to None; transport trouble is never an error here.
pub fn exchange(address: &str, request: &Request) -> Option<Response> {
    let mut stream = connect(address)?;
    write_request(&mut stream, request)?;

    let mut line = String::new();
    let mut reader = BufReader::new(stream);
    match reader.read_line(&mut line) {
        Ok(0) => {
            trace!("Peer {:?} closed the connection without a reply", address);
            None
        }
        Ok(_) => JsonCodec::decode(&line),
        Err(e) => {
            debug!("Failed to read reply from {:?}: {:?}", address, e);
            None
        }
    }
}

/// Send one request without waiting for a reply (gossip path).
/// Returns whether the request left this node successfully.
pub fn send_oneway(address: &str, request: &Request) -> bool {
    match connect(address) {
        Some(mut stream) => write_request(&mut stream, request).is_some(),
        None => false,
    }
}
