use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use super::backoff::{retry, ExponentialBackoff};
use super::comm::{CommError, Communicator};
use super::util;

const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const CONNECT_ATTEMPTS: usize = 40;
const SEND_ATTEMPTS: usize = 3;

type Outbound = (usize, Vec<u8>);

/// What the connection handlers report to `recv`. A connection opens with the
/// sending peer's rank, so frames and hang-ups can be attributed.
enum Inbound {
    Opened(usize),
    Frame(Vec<u8>),
    Closed(usize),
}

/// A communicator whose peers are processes reachable over TCP. Messages are
/// sent as length-prefixed frames, and each frame is acknowledged by the
/// receiver with its length before the next one is sent, so frames from one
/// peer arrive in the order they were sent.
///
/// Outbound messages are queued to a single sender thread, which keeps one
/// connection per destination. Inbound connections are served by a listener
/// thread, which forwards every frame to the channel read by `recv`. Once
/// every other rank has connected and then closed all of its connections,
/// nothing more can arrive, and `recv` fails with `CommError::Closed`.
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: Option<Sender<Outbound>>,
    recv_src: Receiver<Inbound>,
    open_connections: RefCell<HashMap<usize, usize>>,
    send_thread: Option<JoinHandle<()>>,
}

impl TcpCommunicator {
    /// Bind this rank's listening address (`peers[rank]`) and start the
    /// transport threads.
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Result<Self, CommError> {
        let addr = *peers.get(rank).ok_or(CommError::NoSuchRank(rank))?;
        let listener = TcpListener::bind(addr)?;
        info!("[{}] listening on {}", rank, addr);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        Self::start_listener(listener, recv_sink);

        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(rank, peers.clone(), send_src);

        Ok(Self {
            rank,
            num_peers: peers.len(),
            send_sink: Some(send_sink),
            recv_src,
            open_connections: RefCell::new(HashMap::new()),
            send_thread: Some(send_thread),
        })
    }

    /// Wait until every queued message has been delivered and acknowledged,
    /// then shut down the sender thread.
    pub fn finalize(mut self) {
        self.flush()
    }

    fn flush(&mut self) {
        self.send_sink.take();

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("[{}] sender thread panicked", self.rank);
            }
        }
    }

    /// Whether every other rank has connected at some point and has no
    /// connection open now.
    fn peers_gone(&self) -> bool {
        let open = self.open_connections.borrow();
        (0..self.num_peers)
            .filter(|&r| r != self.rank)
            .all(|r| open.get(&r) == Some(&0))
    }

    fn start_serial_sender(rank: usize, peers: Vec<SocketAddr>, send_src: Receiver<Outbound>) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (dest, message) in send_src {
                let delays = ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2).take(SEND_ATTEMPTS);
                let attempt = || {
                    Self::deliver(&mut table, &peers, rank, dest, &message).map_err(|e| {
                        table.remove(&dest);
                        e
                    })
                };
                let result = retry(delays, attempt, |e, _| {
                    warn!("failed to send message to {}: {}", peers[dest], e)
                });

                if let Err(e) = result {
                    error!("giving up on {}: {}", peers[dest], e);
                    return;
                }
            }
            debug!("sender thread shutting down");
        })
    }

    fn deliver(
        table: &mut HashMap<usize, TcpStream>,
        peers: &[SocketAddr],
        rank: usize,
        dest: usize,
        message: &[u8],
    ) -> io::Result<()> {
        if !table.contains_key(&dest) {
            let mut stream = Self::connect_with_retry(peers[dest])?;
            stream.write_all(&rank.to_le_bytes())?;
            table.insert(dest, stream);
        }
        let stream = table
            .get_mut(&dest)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no stream"))?;

        util::write_frame(stream, message)?;
        let ack = util::read_usize(stream)?;

        if ack != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but receiver acked {} bytes", message.len(), ack),
            ));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, recv_sink: Sender<Inbound>) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        Self::handle_connection(stream, recv_sink.clone());
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                }
            }
        });
    }

    fn handle_connection(mut stream: TcpStream, recv_sink: Sender<Inbound>) -> JoinHandle<()> {
        let remote = stream.peer_addr().ok();
        info!("receiving connection from {:?}", remote);

        thread::spawn(move || {
            let peer = match util::read_usize(&mut stream) {
                Ok(peer) => peer,
                Err(e) => {
                    error!("connection from {:?} sent no rank: {}", remote, e);
                    return;
                }
            };
            if recv_sink.send(Inbound::Opened(peer)).is_err() {
                return;
            }

            loop {
                let result = util::read_frame(&mut stream).and_then(|bytes| {
                    let num_bytes = bytes.len();
                    recv_sink
                        .send(Inbound::Frame(bytes))
                        .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?;
                    stream.write_all(&num_bytes.to_le_bytes())
                });

                match result {
                    Ok(()) => (),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("connection from rank {} closed", peer);
                        break;
                    }
                    Err(e) => {
                        error!("connection from rank {} failed: {}", peer, e);
                        break;
                    }
                }
            }
            recv_sink.send(Inbound::Closed(peer)).ok();
        })
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        let delays = ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2).take(CONNECT_ATTEMPTS);

        retry(delays, || TcpStream::connect(addr), |e, delay| {
            debug!("connect to {} failed ({}), retrying in {:?}", addr, e, delay)
        })
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<(), CommError> {
        if rank >= self.num_peers {
            return Err(CommError::NoSuchRank(rank));
        }
        self.send_sink
            .as_ref()
            .ok_or(CommError::Disconnected(rank))?
            .send((rank, message))
            .map_err(|_| CommError::Disconnected(rank))
    }

    fn recv(&self) -> Result<Vec<u8>, CommError> {
        loop {
            let inbound = match self.recv_src.try_recv() {
                Ok(inbound) => inbound,
                Err(_) if self.peers_gone() => return Err(CommError::Closed),
                Err(_) => self.recv_src.recv().map_err(|_| CommError::Closed)?,
            };
            match inbound {
                Inbound::Frame(bytes) => return Ok(bytes),
                Inbound::Opened(peer) => {
                    *self.open_connections.borrow_mut().entry(peer).or_insert(0) += 1;
                }
                Inbound::Closed(peer) => {
                    if let Some(count) = self.open_connections.borrow_mut().get_mut(&peer) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.flush()
    }
}
