//! Status byte broadcast used by a device to raise service requests.
//!
//! A device (or whatever drives it) keeps a [Sender] and calls [Sender::send_status] with its
//! current status byte whenever it requests service. Every protocol link interested in service
//! requests holds its own [Receiver].

use alloc::{sync::Arc, vec::Vec};
use futures::channel::mpsc;
use spin::Mutex;

use crate::STB_RQS;

/// A mpmc channel where **ALL** receivers receive the sent status (i.e. a broadcast channel).
#[derive(Clone, Default)]
pub struct Sender {
    senders: Arc<Mutex<Vec<mpsc::Sender<u8>>>>,
}

pub type Receiver = mpsc::Receiver<u8>;

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast a status byte. Receivers which are full miss it, closed receivers are dropped.
    pub fn send_status(&self, status: u8) {
        let mut senders = self.senders.lock();
        senders.retain_mut(|sender| {
            let _ = sender.try_send(status);
            !sender.is_closed()
        });
    }

    /// Broadcast a service request, i.e. `status` with the RQS bit set.
    pub fn request_service(&self, status: u8) {
        self.send_status(status | STB_RQS)
    }

    pub fn subscribe(&self) -> Receiver {
        let mut senders = self.senders.lock();
        let (sender, receiver) = mpsc::channel(4);
        senders.push(sender);
        receiver
    }

    /// Number of receivers still attached
    pub fn receiver_count(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|sender| !sender.is_closed());
        senders.len()
    }
}
