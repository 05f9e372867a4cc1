use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use peacefair_protocol::{modbus::MAX_FRAME_LEN, RequestKind};

use super::{
    config::{Protocol, TransportConfig, MAX_TIMEOUT},
    error::{is_timeout_kind, TransportError},
};

/// One open connection to the meter, moving whole RTU frames.
///
/// Implementations are only ever driven by a session that holds its gate,
/// so they need not be `Sync`.
pub trait Link: Send {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Read one response frame for `kind`. An empty vector means nothing
    /// arrived before the timeout.
    fn recv_frame(&mut self, kind: RequestKind) -> io::Result<Vec<u8>>;

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory producing a fresh link for a configuration.
pub type LinkOpener =
    dyn Fn(&TransportConfig) -> Result<Box<dyn Link>, TransportError> + Send + Sync;

/// Open the socket `config` asks for.
pub fn open_link(config: &TransportConfig) -> Result<Box<dyn Link>, TransportError> {
    match config.protocol {
        Protocol::RtuOverTcp => Ok(Box::new(TcpLink::connect(config)?)),
        Protocol::RtuOverUdp => Ok(Box::new(UdpLink::connect(config)?)),
    }
}

fn resolve(config: &TransportConfig) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect {
            addr: config.address(),
            source,
        })?
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(TransportError::Resolve {
            addr: config.address(),
        });
    }
    Ok(addrs)
}

fn connect_error(config: &TransportConfig, source: io::Error) -> TransportError {
    if is_timeout_kind(&source) {
        TransportError::ConnectTimeout {
            addr: config.address(),
            timeout: config.timeout,
        }
    } else {
        TransportError::Connect {
            addr: config.address(),
            source,
        }
    }
}

fn effective_timeout(config: &TransportConfig) -> Duration {
    config.timeout.clamp(Duration::from_millis(1), MAX_TIMEOUT)
}

/// RTU frames over a TCP stream. Frame boundaries are recovered from the
/// length the response head announces.
pub struct TcpLink {
    stream: TcpStream,
    timeout: Duration,
}

impl TcpLink {
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let timeout = effective_timeout(config);
        let mut last_error = None;

        for addr in resolve(config)? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    let configure = |stream: &TcpStream| -> io::Result<()> {
                        stream.set_nodelay(true)?;
                        stream.set_write_timeout(Some(timeout))?;
                        stream.set_read_timeout(Some(timeout))
                    };
                    configure(&stream).map_err(|err| connect_error(config, err))?;
                    log::debug!("Connected to {} via {addr}", config.address());
                    return Ok(Self { stream, timeout });
                }
                Err(err) => {
                    log::debug!("Connect to {addr} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(err) => connect_error(config, err),
            None => TransportError::Resolve {
                addr: config.address(),
            },
        })
    }

    /// Throw away bytes left over from an exchange that timed out, so a
    /// late answer is never taken for the next one.
    fn drain_stale(&mut self) -> io::Result<usize> {
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0u8; MAX_FRAME_LEN];
        let mut drained = 0;
        let result = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(drained),
                Ok(n) => drained += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(drained),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }
}

impl Link for TcpLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let stale = self.drain_stale()?;
        if stale > 0 {
            log::warn!("Discarded {stale} stale bytes before request");
        }
        self.stream.write_all(frame)?;
        self.stream.flush()
    }

    fn recv_frame(&mut self, kind: RequestKind) -> io::Result<Vec<u8>> {
        let start = Instant::now();
        let deadline = start.checked_add(self.timeout).unwrap_or(start);
        let mut frame = Vec::with_capacity(MAX_FRAME_LEN);
        let mut chunk = [0u8; MAX_FRAME_LEN];

        loop {
            let wanted = kind
                .frame_len(&frame)
                .unwrap_or_else(|| (frame.len() + 1).max(2))
                .min(MAX_FRAME_LEN);
            if frame.len() >= wanted {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.stream.set_read_timeout(Some(remaining))?;

            match self.stream.read(&mut chunk[..wanted - frame.len()]) {
                Ok(0) if frame.is_empty() => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ))
                }
                Ok(0) => break,
                Ok(n) => frame.extend_from_slice(&chunk[..n]),
                Err(err) if is_timeout_kind(&err) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(frame)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

/// RTU frames over UDP, exactly one frame per datagram.
pub struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let timeout = effective_timeout(config);
        let mut last_error = None;

        for addr in resolve(config)? {
            let local: SocketAddr = if addr.is_ipv4() {
                (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let attempt = UdpSocket::bind(local).and_then(|socket| {
                socket.connect(addr)?;
                socket.set_read_timeout(Some(timeout))?;
                socket.set_write_timeout(Some(timeout))?;
                Ok(socket)
            });
            match attempt {
                Ok(socket) => {
                    log::debug!("UDP link to {} via {addr}", config.address());
                    return Ok(Self { socket });
                }
                Err(err) => {
                    log::debug!("UDP connect to {addr} failed: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(err) => connect_error(config, err),
            None => TransportError::Resolve {
                addr: config.address(),
            },
        })
    }

    fn drain_stale(&mut self) -> io::Result<usize> {
        self.socket.set_nonblocking(true)?;
        let mut scratch = [0u8; MAX_FRAME_LEN];
        let mut drained = 0;
        let result = loop {
            match self.socket.recv(&mut scratch) {
                Ok(_) => drained += 1,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(drained),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                // an ICMP error queued by an earlier datagram; the send below reports fresh ones
                Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => break Ok(drained),
                Err(err) => break Err(err),
            }
        };
        self.socket.set_nonblocking(false)?;
        result
    }
}

impl Link for UdpLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let stale = self.drain_stale()?;
        if stale > 0 {
            log::warn!("Discarded {stale} stale datagrams before request");
        }
        self.socket.send(frame).map(|_| ())
    }

    fn recv_frame(&mut self, _kind: RequestKind) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; MAX_FRAME_LEN];
        loop {
            match self.socket.recv(&mut buffer) {
                Ok(n) => {
                    buffer.truncate(n);
                    return Ok(buffer);
                }
                Err(err) if is_timeout_kind(&err) => return Ok(Vec::new()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}
