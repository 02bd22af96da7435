//! Test doubles: in-memory connections, scripted sources, a one-shot HTTP server

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};

use crate::error::{RadioError, Result};
use crate::stream::source::{Connection, StreamSource};

/// Connection fed chunk-by-chunk from a channel.
///
/// Each `Ok` chunk is served in order. An `Err` message, or dropping the
/// sender, makes the next read fail like a dropped socket. The shutdown hook
/// from [`connection`](Self::connection) aborts a blocked read.
pub struct ChannelReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    abort_tx: Sender<()>,
    abort_rx: Receiver<()>,
    current: Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

impl ChannelReader {
    pub fn new() -> (Sender<io::Result<Vec<u8>>>, Self) {
        let (tx, rx) = unbounded();
        let (abort_tx, abort_rx) = bounded(1);
        (
            tx,
            Self {
                rx,
                abort_tx,
                abort_rx,
                current: Cursor::new(Vec::new()),
                dropped: Arc::new(AtomicBool::new(false)),
            },
        )
    }

    /// Set when the reader is dropped
    pub fn dropped_flag(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }

    /// Wrap as a connection whose shutdown aborts a pending read
    pub fn connection(self) -> Connection {
        let abort = self.abort_tx.clone();
        Connection::with_shutdown(self, move || {
            let _ = abort.try_send(());
        })
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            select! {
                recv(self.abort_rx) -> _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "test connection shut down",
                    ))
                }
                recv(self.rx) -> msg => match msg {
                    Ok(Ok(chunk)) => self.current = Cursor::new(chunk),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "test connection dropped",
                        ))
                    }
                },
            }
        }
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Reader that always fails
pub struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
    }
}

/// One scripted `connect()` outcome
pub enum Connect {
    Ok(Connection),
    Fail(RadioError),
}

/// `StreamSource` that pops pre-scripted outcomes; once exhausted every
/// attempt fails with HTTP 503.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Connect>>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Connect>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `connect()` calls
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }
}

impl StreamSource for ScriptedSource {
    fn connect(&self) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Connect::Ok(conn)) => Ok(conn),
            Some(Connect::Fail(err)) => Err(err),
            None => Err(RadioError::HttpStatus(503)),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub mod http {
    //! Minimal blocking HTTP/1.1 responder on 127.0.0.1

    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};

    /// Canned response; the body is close-delimited
    pub struct Reply {
        status: u16,
        reason: &'static str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        /// Keep the socket open after the body until the client hangs up
        hold: bool,
    }

    impl Reply {
        pub fn ok(body: Vec<u8>) -> Self {
            Self {
                status: 200,
                reason: "OK",
                headers: Vec::new(),
                body,
                hold: false,
            }
        }

        pub fn status(status: u16, reason: &'static str) -> Self {
            Self {
                status,
                reason,
                headers: Vec::new(),
                body: Vec::new(),
                hold: false,
            }
        }

        pub fn header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }

        /// Stall after the body instead of closing
        pub fn hold_open(mut self) -> Self {
            self.hold = true;
            self
        }
    }

    pub struct TestServer {
        port: u16,
        requests: Receiver<String>,
        disconnects: Receiver<()>,
    }

    impl TestServer {
        pub fn url(&self) -> String {
            format!("http://127.0.0.1:{}/stream", self.port)
        }

        /// Raw head of the next request the server received
        pub fn request(&self) -> String {
            self.requests
                .recv_timeout(Duration::from_secs(5))
                .expect("no request received")
        }

        /// True once the client closed a held-open connection
        pub fn client_disconnected(&self, timeout: Duration) -> bool {
            self.disconnects.recv_timeout(timeout).is_ok()
        }
    }

    /// Serve `replies` to successive connections, then stop listening
    pub fn serve(replies: Vec<Reply>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let port = listener.local_addr().expect("local addr").port();
        let (tx, rx) = unbounded();
        let (gone_tx, gone_rx) = unbounded();

        thread::spawn(move || {
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let head = read_head(&mut stream);
                let _ = tx.send(head);
                if write_reply(&mut stream, &reply).is_err() || !reply.hold {
                    continue;
                }
                let gone_tx = gone_tx.clone();
                thread::spawn(move || {
                    let _ = stream.set_read_timeout(None);
                    let mut sink = [0u8; 256];
                    // Returns on FIN (Ok(0)) or reset (Err)
                    while let Ok(n) = stream.read(&mut sink) {
                        if n == 0 {
                            break;
                        }
                    }
                    let _ = gone_tx.send(());
                });
            }
        });

        TestServer {
            port,
            requests: rx,
            disconnects: gone_rx,
        }
    }

    pub fn serve_once(reply: Reply) -> TestServer {
        serve(vec![reply])
    }

    fn read_head(stream: &mut TcpStream) -> String {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => head.push(byte[0]),
                _ => break,
            }
        }
        String::from_utf8_lossy(&head).into_owned()
    }

    fn write_reply(stream: &mut TcpStream, reply: &Reply) -> std::io::Result<()> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", reply.status, reply.reason);
        for (name, value) in &reply.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("Connection: close\r\n\r\n");
        stream.write_all(out.as_bytes())?;
        stream.write_all(&reply.body)?;
        stream.flush()
    }

    /// `metaint` audio bytes, a length byte, then `metadata` NUL-padded to 16
    pub fn icy_body(metaint: usize, metadata: &str) -> Vec<u8> {
        let mut body = vec![0xAAu8; metaint];
        let blocks = metadata.len().div_ceil(16);
        body.push(blocks as u8);
        let mut meta = metadata.as_bytes().to_vec();
        meta.resize(blocks * 16, 0);
        body.extend_from_slice(&meta);
        body.extend_from_slice(&[0xBBu8; 256]);
        body
    }
}
