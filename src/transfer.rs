//! Chunked transfer of large records over a bounded-frame channel
//!
//! A record whose JSON encoding exceeds the chunk size is sent with its
//! detachable payload removed, followed by the payload in ordered fragments.
//! A `Ready` frame closes the transfer. The receiver only ever yields complete
//! record sets; any gap turns into `TransferIncomplete` and the partial data
//! is dropped. Frames must be delivered in the order they were sent, and a
//! transfer that is still open when a newer one starts is abandoned.

use crate::error::{RecorderError, Result};
use crate::session::trace::base64_bytes;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// A record carrying one large payload that can travel separately
pub trait Detachable {
    fn payload_len(&self) -> usize;

    /// Remove and return the payload, leaving the record light
    fn detach_payload(&mut self) -> Option<Vec<u8>>;

    /// Restore a payload previously detached
    fn attach_payload(&mut self, data: Vec<u8>);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame<R> {
    Record {
        transfer_id: u64,
        index: usize,
        /// Fragments for this record follow
        fragmented: bool,
        record: R,
    },
    Fragment {
        transfer_id: u64,
        index: usize,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        last: bool,
    },
    Ready {
        transfer_id: u64,
        records: usize,
    },
}

impl<R> Frame<R> {
    pub fn transfer_id(&self) -> u64 {
        match self {
            Frame::Record { transfer_id, .. }
            | Frame::Fragment { transfer_id, .. }
            | Frame::Ready { transfer_id, .. } => *transfer_id,
        }
    }
}

#[async_trait]
pub trait FrameSink<R: Send + 'static>: Send {
    async fn send_frame(&mut self, frame: Frame<R>) -> Result<()>;
}

/// Sends frames as JSON text over an mpsc channel, enforcing a frame size limit
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
    max_frame_bytes: usize,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>, max_frame_bytes: usize) -> Self {
        Self { tx, max_frame_bytes }
    }
}

#[async_trait]
impl<R: Serialize + Send + 'static> FrameSink<R> for ChannelSink {
    async fn send_frame(&mut self, frame: Frame<R>) -> Result<()> {
        let text = serde_json::to_string(&frame)?;
        if text.len() > self.max_frame_bytes {
            return Err(RecorderError::FrameTooLarge {
                size: text.len(),
                max: self.max_frame_bytes,
            });
        }
        self.tx
            .send(text)
            .await
            .map_err(|_| RecorderError::ChannelClosed("frame receiver dropped".to_string()))
    }
}

/// Byte length of `value` as JSON, without building the string
pub fn encoded_len<T: Serialize>(value: &T) -> Result<usize> {
    struct Counter(usize);

    impl std::io::Write for Counter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0 += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let mut counter = Counter(0);
    serde_json::to_writer(&mut counter, value)?;
    Ok(counter.0)
}

/// Split a payload into consecutive chunks of at most `chunk_size` bytes
pub fn split_payload(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    data.chunks(chunk_size.max(1)).collect()
}

pub struct TransferSender {
    chunk_size: usize,
    next_id: AtomicU64,
}

impl TransferSender {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send every record followed by a `Ready` frame; returns the transfer id.
    pub async fn send<R, S>(&self, records: Vec<R>, sink: &mut S) -> Result<u64>
    where
        R: Detachable + Serialize + Send + 'static,
        S: FrameSink<R>,
    {
        let transfer_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let count = records.len();
        let mut fragments_sent = 0usize;

        for (index, mut record) in records.into_iter().enumerate() {
            // Escaping can grow a payload well past its raw length
            if record.payload_len() == 0 || encoded_len(&record)? <= self.chunk_size {
                sink.send_frame(Frame::Record {
                    transfer_id,
                    index,
                    fragmented: false,
                    record,
                })
                .await?;
                continue;
            }

            let payload = record.detach_payload().unwrap_or_default();
            sink.send_frame(Frame::Record {
                transfer_id,
                index,
                fragmented: true,
                record,
            })
            .await?;

            let chunks = split_payload(&payload, self.chunk_size);
            let total = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                sink.send_frame(Frame::Fragment {
                    transfer_id,
                    index,
                    data: chunk.to_vec(),
                    last: i + 1 == total,
                })
                .await?;
                fragments_sent += 1;
            }
        }

        sink.send_frame(Frame::Ready {
            transfer_id,
            records: count,
        })
        .await?;
        log::info!(
            "Transfer {} sent: {} records, {} fragments",
            transfer_id,
            count,
            fragments_sent
        );
        Ok(transfer_id)
    }
}

struct PendingRecord<R> {
    record: R,
    buffer: Vec<u8>,
}

struct InFlight<R> {
    records: BTreeMap<usize, PendingRecord<R>>,
    /// Record whose fragment stream is still open
    open: Option<usize>,
}

impl<R> Default for InFlight<R> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            open: None,
        }
    }
}

/// Reassembles transfers, keyed by transfer id
pub struct TransferReceiver<R> {
    transfers: HashMap<u64, InFlight<R>>,
}

impl<R> Default for TransferReceiver<R> {
    fn default() -> Self {
        Self {
            transfers: HashMap::new(),
        }
    }
}

impl<R: Detachable> TransferReceiver<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.transfers.len()
    }

    /// Drop transfers older than `transfer_id`; they can no longer finish.
    fn evict_before(&mut self, transfer_id: u64) {
        self.transfers.retain(|&id, transfer| {
            if id >= transfer_id {
                return true;
            }
            log::warn!(
                "Abandoning transfer {} ({} records buffered) for transfer {}",
                id,
                transfer.records.len(),
                transfer_id
            );
            false
        });
    }

    /// Accept one frame; yields the full record set once its `Ready` arrives.
    pub fn accept(&mut self, frame: Frame<R>) -> Result<Option<Vec<R>>> {
        match frame {
            Frame::Record {
                transfer_id,
                index,
                fragmented,
                record,
            } => {
                if !self.transfers.contains_key(&transfer_id) {
                    self.evict_before(transfer_id);
                }
                let transfer = self.transfers.entry(transfer_id).or_default();
                if let Some(open) = transfer.open {
                    self.transfers.remove(&transfer_id);
                    return Err(RecorderError::TransferIncomplete {
                        transfer_id,
                        reason: format!("record {} arrived before record {} was complete", index, open),
                    });
                }
                if transfer.records.contains_key(&index) {
                    self.transfers.remove(&transfer_id);
                    return Err(RecorderError::Protocol(format!(
                        "duplicate record {} in transfer {}",
                        index, transfer_id
                    )));
                }
                transfer.records.insert(
                    index,
                    PendingRecord {
                        record,
                        buffer: Vec::new(),
                    },
                );
                if fragmented {
                    transfer.open = Some(index);
                }
                Ok(None)
            }
            Frame::Fragment {
                transfer_id,
                index,
                data,
                last,
            } => {
                let Some(transfer) = self.transfers.get_mut(&transfer_id) else {
                    return Err(RecorderError::Protocol(format!(
                        "fragment for unknown transfer {}",
                        transfer_id
                    )));
                };
                if transfer.open != Some(index) {
                    self.transfers.remove(&transfer_id);
                    return Err(RecorderError::Protocol(format!(
                        "unexpected fragment for record {} in transfer {}",
                        index, transfer_id
                    )));
                }
                let Some(pending) = transfer.records.get_mut(&index) else {
                    return Err(RecorderError::Protocol(format!(
                        "fragment for missing record {}",
                        index
                    )));
                };
                pending.buffer.extend_from_slice(&data);
                if last {
                    let payload = std::mem::take(&mut pending.buffer);
                    pending.record.attach_payload(payload);
                    transfer.open = None;
                }
                Ok(None)
            }
            Frame::Ready {
                transfer_id,
                records,
            } => {
                let transfer = self.transfers.remove(&transfer_id).unwrap_or_default();
                if let Some(open) = transfer.open {
                    return Err(RecorderError::TransferIncomplete {
                        transfer_id,
                        reason: format!("fragment stream for record {} never finished", open),
                    });
                }
                let complete = transfer.records.len() == records
                    && transfer.records.keys().copied().eq(0..records);
                if !complete {
                    return Err(RecorderError::TransferIncomplete {
                        transfer_id,
                        reason: format!(
                            "expected {} records, received {}",
                            records,
                            transfer.records.len()
                        ),
                    });
                }
                log::info!("Transfer {} complete: {} records", transfer_id, records);
                Ok(Some(
                    transfer.records.into_values().map(|p| p.record).collect(),
                ))
            }
        }
    }
}

impl<R: Detachable + DeserializeOwned> TransferReceiver<R> {
    /// Read JSON frames from a channel until one transfer completes.
    pub async fn receive(&mut self, rx: &mut mpsc::Receiver<String>) -> Result<Vec<R>> {
        while let Some(text) = rx.recv().await {
            let frame: Frame<R> = serde_json::from_str(&text)?;
            if let Some(records) = self.accept(frame)? {
                return Ok(records);
            }
        }
        Err(RecorderError::ChannelClosed(
            "sender closed before transfer was ready".to_string(),
        ))
    }
}

/// Concatenate fragments back into a payload
pub fn reassemble<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    chunks.into_iter().flatten().copied().collect()
}
