//! WebSocket stream transport (`ws://.../process_stream`).
//!
//! Blocking `tungstenite` client over a plain `TcpStream`. The socket gets a
//! short read timeout after the handshake so `recv` returns `Recv::Idle`
//! instead of blocking the loop.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tungstenite::{Message, WebSocket};
use url::Url;

use super::channel::{Recv, StreamConnection, StreamTransport};
use crate::error::ChannelError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(20);

pub struct WsTransport {
    url: Url,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid stream url '{}'", url))?;
        match url.scheme() {
            "ws" => {}
            "wss" => return Err(anyhow!("wss stream urls are not supported: {}", url)),
            other => return Err(anyhow!("stream url must be ws://, got '{}'", other)),
        }
        if url.host_str().is_none() {
            return Err(anyhow!("stream url has no host: {}", url));
        }
        Ok(Self {
            url,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn open_tcp(&self) -> Result<TcpStream, ChannelError> {
        let addrs = self
            .url
            .socket_addrs(|| Some(80))
            .map_err(|e| ChannelError::Transport(format!("resolve {}: {}", self.url, e)))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(ChannelError::Transport(match last_error {
            Some(e) => format!("connect {}: {}", self.url, e),
            None => format!("no addresses for {}", self.url),
        }))
    }
}

impl StreamTransport for WsTransport {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn connect(&mut self) -> Result<Box<dyn StreamConnection>, ChannelError> {
        let stream = self.open_tcp()?;
        let io_err = |e: std::io::Error| ChannelError::Transport(e.to_string());
        stream.set_read_timeout(Some(self.connect_timeout)).map_err(io_err)?;
        stream.set_write_timeout(Some(self.connect_timeout)).map_err(io_err)?;
        let (socket, _response) = tungstenite::client(self.url.as_str(), stream)
            .map_err(|e| ChannelError::Transport(format!("handshake failed: {}", e)))?;
        socket
            .get_ref()
            .set_read_timeout(Some(POLL_READ_TIMEOUT))
            .map_err(io_err)?;
        Ok(Box::new(WsConnection { socket }))
    }
}

pub struct WsConnection {
    socket: WebSocket<TcpStream>,
}

impl StreamConnection for WsConnection {
    fn recv(&mut self) -> Result<Recv, ChannelError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Recv::Message(text)),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Recv::Message(text)),
                Err(_) => {
                    log::debug!("ignoring non-utf8 binary stream message");
                    Ok(Recv::Idle)
                }
            },
            Ok(Message::Close(_)) => Ok(Recv::Closed),
            Ok(_) => Ok(Recv::Idle),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(Recv::Closed)
            }
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(Recv::Idle)
            }
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }

    fn send(&mut self, text: &str) -> Result<(), ChannelError> {
        self.socket
            .send(Message::Text(text.to_string()))
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None) {
            log::debug!("stream close: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn only_plain_ws_urls() {
        assert!(WsTransport::new("ws://127.0.0.1:5000/process_stream").is_ok());
        assert!(WsTransport::new("wss://example.org/process_stream").is_err());
        assert!(WsTransport::new("http://127.0.0.1:5000/").is_err());
        assert!(WsTransport::new("not a url").is_err());
    }

    #[test]
    fn receives_text_from_loopback_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            ws.send(Message::Text(r#"{"event": "status", "status": "ok"}"#.into()))
                .unwrap();
            let _ = ws.close(None);
            while ws.read().is_ok() {}
        });

        let mut transport = WsTransport::new(&format!("ws://{}/process_stream", addr)).unwrap();
        let mut connection = transport.connect().unwrap();
        let mut received = None;
        for _ in 0..200 {
            match connection.recv().unwrap() {
                Recv::Message(text) => {
                    received = Some(text);
                    break;
                }
                Recv::Idle => continue,
                Recv::Closed => break,
            }
        }
        assert!(received.unwrap().contains("\"status\""));
        connection.close();
        drop(connection);
        server.join().unwrap();
    }
}
