use crossbeam_channel::{Receiver, Sender};




#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("no peer with rank {0}")]
    NoSuchRank(usize),
    #[error("the outbound channel to rank {0} is closed")]
    Disconnected(usize),
    #[error("the inbound channel is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("message from rank {source_rank} has tag {found}, expected {expected}")]
    OutOfOrder {
        source_rank: usize,
        expected: u64,
        found: u64,
    },
    #[error("transport failure: {0}")]
    Io(#[from] std::io::Error),
}




/// Interface for a group of processes that can exchange messages. The
/// underlying transport can in principle be in-process channels, TCP, or a
/// higher level abstraction like MPI.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator, including this one.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: usize, message: Vec<u8>) -> Result<(), CommError>;

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready to be received.
    fn recv(&self) -> Result<Vec<u8>, CommError>;
}




/// A communicator between threads of one process. A group of size one is
/// what a serial run uses.
///
pub struct ChannelCommunicator {
    rank: usize,
    sinks: Vec<Sender<Vec<u8>>>,
    src: Receiver<Vec<u8>>,
}

impl ChannelCommunicator {
    /// Create a fully connected group of communicators, one per rank. Each
    /// is meant to be moved to the thread that plays that rank.
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, srcs): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        srcs.into_iter()
            .enumerate()
            .map(|(rank, src)| Self {
                rank,
                sinks: sinks.clone(),
                src,
            })
            .collect()
    }

    /// A group with a single member.
    pub fn serial() -> Self {
        Self::group(1).remove(0)
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.sinks.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<(), CommError> {
        self.sinks
            .get(rank)
            .ok_or(CommError::NoSuchRank(rank))?
            .send(message)
            .map_err(|_| CommError::Disconnected(rank))
    }

    fn recv(&self) -> Result<Vec<u8>, CommError> {
        self.src.recv().map_err(|_| CommError::Closed)
    }
}
