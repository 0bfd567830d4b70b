// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Two-lane link between the sender and the receiver
//!
//! A [`Link`] carries a quantum lane (photon messages plus end-of-stream) and a
//! public lane (classical reconciliation and hopping messages). Each lane is
//! strictly FIFO. Every read and write is bounded by the link timeout; a read
//! that does not complete aborts the session with `ChannelTimeout`.
//!
//! A transport that gives up on its peer records the reason in the link's
//! [`LinkFault`] and closes the inbound lanes. Reads past that point fail with
//! the recorded reason instead of a plain `ChannelClosed`.

use crate::error::AbortReason;
use crate::protocol::{PublicMessage, QuantumMessage};
use crate::{Error, Result};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Per-lane queue depth
pub const LANE_CAPACITY: usize = 1024;

/// Why a transport stopped delivering inbound frames
pub(crate) type LinkFault = Arc<OnceLock<AbortReason>>;

/// Background I/O tasks owned by a link; aborted when dropped
pub(crate) struct IoTasks {
    pub(crate) writer: Option<JoinHandle<()>>,
    pub(crate) reader: Option<JoinHandle<()>>,
}

impl IoTasks {
    /// Let the writer flush queued frames, then stop both tasks
    async fn finish(mut self, limit: Duration) {
        if let Some(writer) = self.writer.take() {
            if timeout(limit, writer).await.is_err() {
                warn!("Link writer did not flush within {:?}", limit);
            }
        }
    }
}

impl Drop for IoTasks {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// One endpoint of a sender/receiver link
pub struct Link {
    quantum_tx: mpsc::Sender<QuantumMessage>,
    quantum_rx: mpsc::Receiver<QuantumMessage>,
    public_tx: mpsc::Sender<PublicMessage>,
    public_rx: mpsc::Receiver<PublicMessage>,
    timeout: Duration,
    fault: LinkFault,
    io: Option<IoTasks>,
}

/// Raw lanes of a link, for relays that sit between two endpoints
pub struct LinkParts {
    pub quantum_tx: mpsc::Sender<QuantumMessage>,
    pub quantum_rx: mpsc::Receiver<QuantumMessage>,
    pub public_tx: mpsc::Sender<PublicMessage>,
    pub public_rx: mpsc::Receiver<PublicMessage>,
    _io: Option<IoTasks>,
}

impl Link {
    /// Two connected in-memory endpoints
    pub fn pair(read_timeout: Duration) -> (Link, Link) {
        let (a_quantum_tx, b_quantum_rx) = mpsc::channel(LANE_CAPACITY);
        let (b_quantum_tx, a_quantum_rx) = mpsc::channel(LANE_CAPACITY);
        let (a_public_tx, b_public_rx) = mpsc::channel(LANE_CAPACITY);
        let (b_public_tx, a_public_rx) = mpsc::channel(LANE_CAPACITY);

        let a = Link {
            quantum_tx: a_quantum_tx,
            quantum_rx: a_quantum_rx,
            public_tx: a_public_tx,
            public_rx: a_public_rx,
            timeout: read_timeout,
            fault: LinkFault::default(),
            io: None,
        };
        let b = Link {
            quantum_tx: b_quantum_tx,
            quantum_rx: b_quantum_rx,
            public_tx: b_public_tx,
            public_rx: b_public_rx,
            timeout: read_timeout,
            fault: LinkFault::default(),
            io: None,
        };
        (a, b)
    }

    pub(crate) fn from_lanes(
        quantum_tx: mpsc::Sender<QuantumMessage>,
        quantum_rx: mpsc::Receiver<QuantumMessage>,
        public_tx: mpsc::Sender<PublicMessage>,
        public_rx: mpsc::Receiver<PublicMessage>,
        read_timeout: Duration,
        fault: LinkFault,
        io: IoTasks,
    ) -> Self {
        Self {
            quantum_tx,
            quantum_rx,
            public_tx,
            public_rx,
            timeout: read_timeout,
            fault,
            io: Some(io),
        }
    }

    pub async fn send_quantum(&self, message: QuantumMessage) -> Result<()> {
        send_bounded(&self.quantum_tx, message, self.timeout).await
    }

    pub async fn recv_quantum(&mut self) -> Result<QuantumMessage> {
        let received = recv_bounded(&mut self.quantum_rx, self.timeout).await;
        self.attribute(received)
    }

    pub async fn send_public(&self, message: PublicMessage) -> Result<()> {
        debug!(kind = message.kind(), "Public channel send");
        send_bounded(&self.public_tx, message, self.timeout).await
    }

    pub async fn recv_public(&mut self) -> Result<PublicMessage> {
        let received = recv_bounded(&mut self.public_rx, self.timeout).await;
        let message = self.attribute(received)?;
        debug!(kind = message.kind(), "Public channel receive");
        Ok(message)
    }

    /// A closed lane reports the transport's fault when one was recorded
    fn attribute<T>(&self, received: Result<T>) -> Result<T> {
        match (received, self.fault.get()) {
            (Err(Error::Abort(AbortReason::ChannelClosed)), Some(reason)) => {
                Err(Error::Abort(*reason))
            }
            (received, _) => received,
        }
    }

    /// Tell the peer this session is over, ignoring delivery failures
    pub fn notify_abort(&self, reason: AbortReason) {
        if let Err(e) = self.public_tx.try_send(PublicMessage::Abort(reason)) {
            debug!("Could not deliver abort notice to peer: {}", e);
        }
    }

    /// Close the link, flushing queued outbound frames first
    pub async fn shutdown(mut self) {
        let limit = self.timeout;
        let io = self.io.take();
        drop(self);
        if let Some(io) = io {
            io.finish(limit).await;
        }
    }

    pub fn into_parts(self) -> LinkParts {
        LinkParts {
            quantum_tx: self.quantum_tx,
            quantum_rx: self.quantum_rx,
            public_tx: self.public_tx,
            public_rx: self.public_rx,
            _io: self.io,
        }
    }
}

async fn send_bounded<T>(tx: &mpsc::Sender<T>, message: T, limit: Duration) -> Result<()> {
    match timeout(limit, tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(Error::Abort(AbortReason::ChannelClosed)),
        Err(_) => Err(Error::Abort(AbortReason::ChannelTimeout)),
    }
}

async fn recv_bounded<T>(rx: &mut mpsc::Receiver<T>, limit: Duration) -> Result<T> {
    match timeout(limit, rx.recv()).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(Error::Abort(AbortReason::ChannelClosed)),
        Err(_) => Err(Error::Abort(AbortReason::ChannelTimeout)),
    }
}
