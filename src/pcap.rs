use crate::errors::{Error, Result};
use crate::frame::Frame;
use crate::nic::NicWrapper;
use async_trait::async_trait;
use parking_lot::Mutex;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{DataLink, Endianness, TsResolution};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Frames buffered between the link worker and the writer task before the
/// eldest is discarded.
const CAPTURE_QUEUE_DEPTH: usize = 4096;

/// NIC wrapper that copies every passing frame to a capture file in classic
/// libpcap format (LINKTYPE_ETHERNET).
///
/// Capture never back-pressures the link: frames are queued toward a writer
/// task and the eldest queued frame is dropped when the writer falls behind.
/// [`NicWrapper::close`] drains the queue and flushes the file.
pub struct PcapDumper {
    shared: Arc<DumperShared>,
    cancel: CancellationToken,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

struct DumperShared {
    queue: Mutex<VecDeque<(Duration, Frame)>>,
    notify: Notify,
    capture_start: Instant,
    overflow_drops: AtomicU64,
}

impl PcapDumper {
    /// Creates the capture file at `path` and starts the writer task.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        let header = PcapHeader {
            version_major: 2,
            version_minor: 4,
            ts_correction: 0,
            ts_accuracy: 0,
            snaplen: 65535,
            datalink: DataLink::ETHERNET,
            ts_resolution: TsResolution::MicroSecond,
            endianness: Endianness::Big,
        };
        let writer = PcapWriter::with_header(BufWriter::new(file), header)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let shared = Arc::new(DumperShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capture_start: Instant::now(),
            overflow_drops: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let writer_task = tokio::spawn(write_loop(shared.clone(), cancel.clone(), writer));

        Ok(Self {
            shared,
            cancel,
            writer_task: Mutex::new(Some(writer_task)),
        })
    }

    /// Frames discarded because the writer could not keep up.
    pub fn overflow_drops(&self) -> u64 {
        self.shared.overflow_drops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NicWrapper for PcapDumper {
    fn observe_frame(&self, frame: &Frame) {
        let timestamp = self.shared.capture_start.elapsed();
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= CAPTURE_QUEUE_DEPTH {
                queue.pop_front();
                self.shared.overflow_drops.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back((timestamp, frame.clone()));
        }
        self.shared.notify.notify_one();
    }

    async fn close(&self) {
        self.cancel.cancel();
        let writer_task = self.writer_task.lock().take();
        if let Some(writer_task) = writer_task {
            if let Err(error) = writer_task.await {
                warn!(%error, "pcap: writer task failed");
            }
        }
    }
}

async fn write_loop(
    shared: Arc<DumperShared>,
    cancel: CancellationToken,
    mut writer: PcapWriter<BufWriter<File>>,
) {
    loop {
        drain_queue(&shared, &mut writer);
        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = cancel.cancelled() => break,
        }
    }
    // a producer may have raced the cancellation
    drain_queue(&shared, &mut writer);
    if let Err(error) = writer.into_writer().flush() {
        warn!(%error, "pcap: failed to flush capture file");
    }
}

fn drain_queue(shared: &DumperShared, writer: &mut PcapWriter<BufWriter<File>>) {
    loop {
        let batch: Vec<(Duration, Frame)> = {
            let mut queue = shared.queue.lock();
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        for (timestamp, frame) in batch {
            let packet = PcapPacket {
                timestamp,
                orig_len: frame.len() as u32,
                data: frame.bytes().into(),
            };
            if let Err(error) = writer.write_packet(&packet) {
                warn!(%error, "pcap: failed to write packet");
            }
        }
    }
}
