// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! TCP transport for [`Link`]
//!
//! Both lanes share one TCP stream. Frames are length-delimited and encoded as
//! MessagePack [`Frame`]s; the reader task demultiplexes them back into the
//! quantum and public lanes, which keeps per-lane order intact. A frame that
//! cannot be decoded is a protocol violation by the peer: the reader records it
//! as the link fault and stops, so the local session aborts and notifies the
//! peer like any other failure.

use crate::channel::{IoTasks, Link, LinkFault, LANE_CAPACITY};
use crate::error::AbortReason;
use crate::protocol::{Frame, PublicMessage, QuantumMessage};
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, instrument, warn};

/// Largest accepted frame
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Connect to a listening peer
#[instrument(skip(read_timeout))]
pub async fn connect(address: &str, read_timeout: Duration) -> Result<Link> {
    let stream = match timeout(read_timeout, TcpStream::connect(address)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Abort(AbortReason::ChannelTimeout)),
    };
    info!("Connected to peer at {}", address);
    Ok(from_stream(stream, read_timeout))
}

/// Wait for one peer on `listener`
pub async fn accept(listener: &TcpListener, read_timeout: Duration) -> Result<(Link, SocketAddr)> {
    let (stream, peer) = match timeout(read_timeout, listener.accept()).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Abort(AbortReason::ChannelTimeout)),
    };
    info!("Accepted connection from {}", peer);
    Ok((from_stream(stream, read_timeout), peer))
}

/// Wrap a connected stream in a link
pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> Link {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle on link socket: {}", e);
    }

    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec();
    let (sink, source) = Framed::new(stream, codec).split();

    let (quantum_out_tx, quantum_out_rx) = mpsc::channel(LANE_CAPACITY);
    let (public_out_tx, public_out_rx) = mpsc::channel(LANE_CAPACITY);
    let (quantum_in_tx, quantum_in_rx) = mpsc::channel(LANE_CAPACITY);
    let (public_in_tx, public_in_rx) = mpsc::channel(LANE_CAPACITY);

    let fault = LinkFault::default();
    let writer = tokio::spawn(write_frames(sink, quantum_out_rx, public_out_rx));
    let reader = tokio::spawn(read_frames(source, quantum_in_tx, public_in_tx, fault.clone()));

    Link::from_lanes(
        quantum_out_tx,
        quantum_in_rx,
        public_out_tx,
        public_in_rx,
        read_timeout,
        fault,
        IoTasks {
            writer: Some(writer),
            reader: Some(reader),
        },
    )
}

async fn write_frames(
    mut sink: SplitSink<FramedStream, Bytes>,
    mut quantum: mpsc::Receiver<QuantumMessage>,
    mut public: mpsc::Receiver<PublicMessage>,
) {
    loop {
        // Public first so a backed-up photon stream cannot hold back control messages
        let frame = tokio::select! {
            biased;
            Some(message) = public.recv() => Frame::Public(message),
            Some(message) = quantum.recv() => Frame::Quantum(message),
            else => break,
        };

        let bytes = match frame.to_msgpack() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode frame: {}", e);
                break;
            }
        };

        if let Err(e) = sink.send(Bytes::from(bytes)).await {
            warn!("Failed to write frame: {}", e);
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Error closing link socket: {}", e);
    }
}

async fn read_frames(
    mut source: SplitStream<FramedStream>,
    quantum: mpsc::Sender<QuantumMessage>,
    public: mpsc::Sender<PublicMessage>,
    fault: LinkFault,
) {
    while let Some(item) = source.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read frame: {}", e);
                // Oversized length prefixes surface as InvalidData
                if e.kind() == std::io::ErrorKind::InvalidData {
                    let _ = fault.set(AbortReason::ProtocolViolation);
                }
                break;
            }
        };

        let delivered = match Frame::from_msgpack(&bytes) {
            Ok(Frame::Quantum(message)) => quantum.send(message).await.is_ok(),
            Ok(Frame::Public(message)) => public.send(message).await.is_ok(),
            Err(e) => {
                warn!("Malformed frame from peer: {}", e);
                let _ = fault.set(AbortReason::ProtocolViolation);
                false
            }
        };

        if !delivered {
            break;
        }
    }
    debug!("Link reader finished");
}
