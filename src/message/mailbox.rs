use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use super::comm::{CommError, Communicator};




#[derive(Serialize, Deserialize)]
struct Envelope {
    source: usize,
    tag: u64,
    data: Vec<u8>,
}




/// A mailbox wraps a communicator and delivers messages by source rank. Each
/// message is stamped with a tag, which is the sequence number of the
/// collective operation that sent it. Messages from a source other than the
/// one being waited on are buffered until asked for.
///
/// Collective operations built on the mailbox must be entered by every rank
/// in the same order. Transports deliver messages from any one source in the
/// order they were sent, so the first buffered message from a source must
/// carry the expected tag; anything else means the ranks have diverged, and
/// is reported as `CommError::OutOfOrder` instead of being silently consumed.
///
pub struct Mailbox<C> {
    comm: C,
    pending: RefCell<HashMap<usize, VecDeque<Envelope>>>,
    next_tag: Cell<u64>,
}

impl<C: Communicator> Mailbox<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            pending: RefCell::new(HashMap::new()),
            next_tag: Cell::new(0),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn into_inner(self) -> C {
        self.comm
    }

    /// Return a fresh tag for the next collective operation. Every rank
    /// draws tags in the same sequence as long as collectives are entered in
    /// the same order.
    pub fn next_tag(&self) -> u64 {
        let tag = self.next_tag.get();
        self.next_tag.set(tag + 1);
        tag
    }

    /// Send a tagged message to a peer.
    pub fn post(&self, dest: usize, tag: u64, data: Vec<u8>) -> Result<(), CommError> {
        let envelope = Envelope {
            source: self.rank(),
            tag,
            data,
        };
        self.comm.send(dest, rmp_serde::to_vec(&envelope)?)
    }

    /// Block until the next message from `source` arrives, and check that it
    /// carries the given tag.
    pub fn collect(&self, source: usize, tag: u64) -> Result<Vec<u8>, CommError> {
        let buffered = self
            .pending
            .borrow_mut()
            .get_mut(&source)
            .and_then(VecDeque::pop_front);

        let envelope = match buffered {
            Some(envelope) => envelope,
            None => loop {
                let envelope: Envelope = rmp_serde::from_slice(&self.comm.recv()?)?;

                if envelope.source == source {
                    break envelope;
                }
                debug!(
                    "[{}] buffering message from rank {} (tag {}) while waiting on rank {}",
                    self.rank(),
                    envelope.source,
                    envelope.tag,
                    source
                );
                self.pending
                    .borrow_mut()
                    .entry(envelope.source)
                    .or_insert_with(VecDeque::new)
                    .push_back(envelope);
            },
        };

        if envelope.tag != tag {
            return Err(CommError::OutOfOrder {
                source_rank: source,
                expected: tag,
                found: envelope.tag,
            });
        }
        Ok(envelope.data)
    }

    /// Combine one value from every rank with `max`, and return the result
    /// on every rank. Collective.
    pub fn all_reduce_max(&self, value: u64) -> Result<u64, CommError> {
        let tag = self.next_tag();
        let rank = self.rank();
        let peers: Vec<usize> = (0..self.size()).filter(|&r| r != rank).collect();

        for &peer in &peers {
            self.post(peer, tag, rmp_serde::to_vec(&value)?)?;
        }
        let mut result = value;

        for &peer in &peers {
            let theirs: u64 = rmp_serde::from_slice(&self.collect(peer, tag)?)?;
            result = result.max(theirs);
        }
        Ok(result)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Mailbox;
    use crate::message::comm::{ChannelCommunicator, CommError};
    use std::thread;


    #[test]
    fn messages_are_delivered_by_source() {
        let mut group = ChannelCommunicator::group(3);
        let c = Mailbox::new(group.pop().unwrap());
        let b = Mailbox::new(group.pop().unwrap());
        let a = Mailbox::new(group.pop().unwrap());

        c.post(0, 0, b"from c".to_vec()).unwrap();
        b.post(0, 0, b"from b".to_vec()).unwrap();

        assert_eq!(a.collect(1, 0).unwrap(), b"from b");
        assert_eq!(a.collect(2, 0).unwrap(), b"from c");
    }


    #[test]
    fn mismatched_tags_are_reported() {
        let mut group = ChannelCommunicator::group(2);
        let b = Mailbox::new(group.pop().unwrap());
        let a = Mailbox::new(group.pop().unwrap());

        b.post(0, 5, vec![]).unwrap();
        assert!(matches!(
            a.collect(1, 4),
            Err(CommError::OutOfOrder { source_rank: 1, expected: 4, found: 5 })
        ));
    }


    #[test]
    fn every_rank_sees_the_largest_value() {
        let procs: Vec<_> = ChannelCommunicator::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mailbox = Mailbox::new(comm);
                    let first = mailbox.all_reduce_max(if mailbox.rank() == 1 { 7 } else { 0 }).unwrap();
                    let second = mailbox.all_reduce_max(mailbox.rank() as u64).unwrap();
                    (first, second, mailbox.next_tag())
                })
            })
            .collect();

        for proc in procs {
            assert_eq!(proc.join().unwrap(), (7, 2, 2));
        }
    }


    #[test]
    fn a_single_rank_reduces_to_its_own_value() {
        let mailbox = Mailbox::new(ChannelCommunicator::serial());
        assert_eq!(mailbox.all_reduce_max(4).unwrap(), 4);
    }


    #[test]
    fn tags_count_up() {
        let mailbox = Mailbox::new(ChannelCommunicator::serial());
        assert_eq!(mailbox.next_tag(), 0);
        assert_eq!(mailbox.next_tag(), 1);
        assert_eq!(mailbox.next_tag(), 2);
    }
}
