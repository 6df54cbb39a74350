//! Per-connection state and the read/write pumps.
//!
//! Every accepted connection gets one [`Client`]: an identity, a bounded
//! outbound queue, and a cancellation token shared by its two pumps. The
//! read pump persists and broadcasts inbound frames; the write pump drains
//! the outbound queue onto the connection. Either pump exiting cancels the
//! other.

use crate::connection::{FrameReceiver, FrameSender};
use crate::room::Room;
use crate::store::MessageStore;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default capacity of a client's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Process-unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Persisted identity of the user behind a connection.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Row id of the user.
    pub user_id: i64,
    /// Row id of the room the user joined.
    pub room_row_id: i64,
    /// Name shown to other room members.
    pub display_name: String,
}

/// One active connection bound to one room.
pub struct Client {
    id: ClientId,
    room_id: Uuid,
    identity: Identity,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl Client {
    /// Create a client and the receiving end of its outbound queue.
    ///
    /// The caller passes the receiver back into [`Client::run`]; the queue
    /// has exactly one consumer (the write pump) for its whole life.
    #[must_use]
    pub fn new(room_id: Uuid, identity: Identity, outbound_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(outbound_capacity.max(1));
        let client = Arc::new(Self {
            id: ClientId::next(),
            room_id,
            identity,
            outbound: tx,
            cancel: CancellationToken::new(),
        });
        (client, rx)
    }

    /// Get the client's connection-scoped id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Get the uuid of the room this client belongs to.
    #[must_use]
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Get the persisted identity behind this connection.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get the name shown to other room members.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }

    /// Non-blocking enqueue onto the outbound queue.
    ///
    /// Returns `false` if the frame was dropped. A full queue drops the
    /// frame rather than blocking the producer; this is the only
    /// backpressure policy for slow consumers.
    pub fn send_raw(&self, frame: Bytes) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %self.id, "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Signal both pumps to terminate.
    ///
    /// The write pump sends a close frame before exiting. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Drive the connection until it ends.
    ///
    /// Spawns the write pump, runs the read pump inline, and returns once
    /// both have exited. The caller removes the client from its room
    /// afterwards; the connection halves are dropped (and thereby closed)
    /// on the way out.
    pub async fn run<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
        outbox: mpsc::Receiver<Bytes>,
        room: Arc<Room>,
        store: Arc<dyn MessageStore>,
    ) where
        R: FrameReceiver,
        W: FrameSender + 'static,
    {
        let write_task = tokio::spawn(write_pump(writer, outbox, self.cancel.clone(), self.id));
        self.read_pump(reader, room, store).await;
        self.cancel.cancel();
        let _ = write_task.await;
    }

    /// Blocking receive loop: persist, then broadcast.
    ///
    /// Persistence failure is logged and never aborts the broadcast;
    /// delivery is not contingent on durability.
    async fn read_pump<R: FrameReceiver>(
        &self,
        mut reader: R,
        room: Arc<Room>,
        store: Arc<dyn MessageStore>,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                frame = reader.recv() => frame,
            };
            match frame {
                Ok(Some(data)) => {
                    if let Err(err) = store
                        .create_message(self.identity.room_row_id, self.identity.user_id, &data)
                        .await
                    {
                        warn!(client = %self.id, error = %err, "failed to persist message");
                    }
                    room.broadcast(&data, self);
                }
                Ok(None) => {
                    debug!(client = %self.id, "connection closed by peer");
                    break;
                }
                Err(err) => {
                    debug!(client = %self.id, error = %err, "receive error");
                    break;
                }
            }
        }
    }
}

/// Blocking dequeue loop: write each outbound frame to the connection.
///
/// Exits when the queue closes, the shared token cancels, or a write
/// fails; in every case it cancels the token so the read pump stops too.
async fn write_pump<W: FrameSender>(
    mut writer: W,
    mut outbox: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    id: ClientId,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = writer.close().await;
                break;
            }
            frame = outbox.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = writer.send(frame).await {
                        debug!(client = %id, error = %err, "write failed");
                        break;
                    }
                }
                None => {
                    let _ = writer.close().await;
                    break;
                }
            },
        }
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionError;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) struct ScriptedReader {
        rx: mpsc::UnboundedReceiver<Bytes>,
    }

    impl ScriptedReader {
        pub(crate) fn pair() -> (mpsc::UnboundedSender<Bytes>, Self) {
            let (tx, rx) = mpsc::unbounded_channel();
            (tx, Self { rx })
        }
    }

    #[async_trait]
    impl FrameReceiver for ScriptedReader {
        async fn recv(&mut self) -> Result<Option<Bytes>, ConnectionError> {
            Ok(self.rx.recv().await)
        }
    }

    #[derive(Debug, PartialEq)]
    pub(crate) enum WriterEvent {
        Frame(Bytes),
        Close,
    }

    pub(crate) struct RecordingWriter {
        tx: mpsc::UnboundedSender<WriterEvent>,
    }

    impl RecordingWriter {
        pub(crate) fn pair() -> (Self, mpsc::UnboundedReceiver<WriterEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    #[async_trait]
    impl FrameSender for RecordingWriter {
        async fn send(&mut self, frame: Bytes) -> Result<(), ConnectionError> {
            self.tx
                .send(WriterEvent::Frame(frame))
                .map_err(|_| ConnectionError::Closed)
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            let _ = self.tx.send(WriterEvent::Close);
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemStore {
        pub(crate) messages: Mutex<Vec<(i64, i64, Vec<u8>)>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl MessageStore for MemStore {
        async fn create_message(
            &self,
            room_id: i64,
            sender_id: i64,
            content: &[u8],
        ) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::new("disk on fire"));
            }
            self.messages
                .lock()
                .unwrap()
                .push((room_id, sender_id, content.to_vec()));
            Ok(())
        }
    }

    fn identity(name: &str) -> Identity {
        Identity {
            user_id: 1,
            room_row_id: 1,
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn send_raw_drops_when_full() {
        let (client, mut rx) = Client::new(Uuid::new_v4(), identity("alice"), 2);

        assert!(client.send_raw(Bytes::from_static(b"one")));
        assert!(client.send_raw(Bytes::from_static(b"two")));
        assert!(!client.send_raw(Bytes::from_static(b"three")));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn inbound_frame_is_persisted_and_broadcast() {
        let room_id = Uuid::new_v4();
        let room = Arc::new(Room::new(room_id, 100, 2));
        let store = Arc::new(MemStore::default());

        let (sender, sender_rx) = Client::new(room_id, identity("alice"), 8);
        let (receiver, mut receiver_rx) = Client::new(room_id, identity("bob"), 8);
        room.add(sender.clone());
        room.add(receiver.clone());

        let (frames, reader) = ScriptedReader::pair();
        let (writer, _writer_rx) = RecordingWriter::pair();

        frames.send(Bytes::from_static(b"hello")).unwrap();
        drop(frames); // clean close after one frame

        sender
            .run(reader, writer, sender_rx, room.clone(), store.clone())
            .await;

        let delivered = receiver_rx.recv().await.unwrap();
        assert_eq!(&delivered[..], b"alice: hello");

        let stored = store.messages.lock().unwrap();
        assert_eq!(stored.as_slice(), &[(1, 1, b"hello".to_vec())]);
    }

    #[tokio::test]
    async fn store_failure_does_not_abort_broadcast() {
        let room_id = Uuid::new_v4();
        let room = Arc::new(Room::new(room_id, 100, 2));
        let store = Arc::new(MemStore {
            fail: true,
            ..MemStore::default()
        });

        let (sender, sender_rx) = Client::new(room_id, identity("alice"), 8);
        let (receiver, mut receiver_rx) = Client::new(room_id, identity("bob"), 8);
        room.add(sender.clone());
        room.add(receiver.clone());

        let (frames, reader) = ScriptedReader::pair();
        let (writer, _writer_rx) = RecordingWriter::pair();
        frames.send(Bytes::from_static(b"hi")).unwrap();
        drop(frames);

        sender.run(reader, writer, sender_rx, room, store).await;

        assert_eq!(
            receiver_rx.recv().await.unwrap(),
            Bytes::from_static(b"alice: hi")
        );
    }

    #[tokio::test]
    async fn close_terminates_both_pumps_with_close_frame() {
        let room_id = Uuid::new_v4();
        let room = Arc::new(Room::new(room_id, 100, 2));
        let store = Arc::new(MemStore::default());

        let (client, outbox) = Client::new(room_id, identity("alice"), 8);
        room.add(client.clone());

        // Reader that stays pending: the sender half is kept alive.
        let (_frames, reader) = ScriptedReader::pair();
        let (writer, mut writer_rx) = RecordingWriter::pair();

        let runner = {
            let client = client.clone();
            let room = room.clone();
            tokio::spawn(async move { client.run(reader, writer, outbox, room, store).await })
        };

        client.close();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run did not terminate after close")
            .unwrap();

        // The write pump announced the closure to the peer.
        let mut saw_close = false;
        while let Ok(event) = writer_rx.try_recv() {
            if event == WriterEvent::Close {
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn write_failure_stops_the_read_pump() {
        let room_id = Uuid::new_v4();
        let room = Arc::new(Room::new(room_id, 100, 2));
        let store = Arc::new(MemStore::default());

        let (client, outbox) = Client::new(room_id, identity("alice"), 8);
        room.add(client.clone());

        let (_frames, reader) = ScriptedReader::pair();
        // Writer whose receiving half is already gone: first send fails.
        let (writer, writer_rx) = RecordingWriter::pair();
        drop(writer_rx);

        client.send_raw(Bytes::from_static(b"doomed"));

        let runner = {
            let client = client.clone();
            let room = room.clone();
            tokio::spawn(async move { client.run(reader, writer, outbox, room, store).await })
        };

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run did not terminate after write failure")
            .unwrap();
    }
}
