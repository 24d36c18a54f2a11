use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wsbridge_frame::Frame;

/// Output channel depth. One slot: a slow consumer stalls the producer.
pub const OUTPUT_CAPACITY: usize = 1;

/// Receiving half of an endpoint's output channel.
pub type FrameReceiver = mpsc::Receiver<Frame>;

/// One side of the bridge.
///
/// Frames produced by an endpoint arrive on its output channel in decode
/// order. The channel closes exactly once, when the endpoint's reader task
/// finishes.
pub trait Endpoint: Send + Sync {
    /// Take the output channel. Only the first call returns it.
    fn output(&mut self) -> Option<FrameReceiver>;

    /// Write `frame` to the underlying resource. Returns whether the write succeeded.
    fn send(&self, frame: Frame) -> impl Future<Output = bool> + Send;

    /// Start background production. Later calls are ignored.
    fn start_reading(&mut self);

    /// Request shutdown of the underlying resource and stop the reader tasks.
    fn terminate(&self) -> impl Future<Output = ()> + Send;
}

pub(crate) fn output_channel() -> (mpsc::Sender<Frame>, FrameReceiver) {
    mpsc::channel(OUTPUT_CAPACITY)
}

/// Hand `frame` to the consumer, waiting for room. Returns `false` when the
/// consumer is gone or the reader was told to stop.
pub(crate) async fn publish(
    tx: &mpsc::Sender<Frame>,
    frame: Frame,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        sent = tx.send(frame) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn publish_delivers_in_order() {
        let (tx, mut rx) = output_channel();
        let stop = CancellationToken::new();

        let producer = tokio::spawn(async move {
            for payload in [&b"a"[..], &b"b"[..], &b"c"[..]] {
                assert!(publish(&tx, Frame::from(payload), &stop).await);
            }
        });

        for expected in [&b"a"[..], &b"b"[..], &b"c"[..]] {
            assert_eq!(rx.recv().await.unwrap().as_ref(), expected);
        }
        producer.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_unblocks_on_stop() {
        let (tx, _rx) = output_channel();
        let stop = CancellationToken::new();

        assert!(publish(&tx, Frame::from(&b"fills"[..]), &stop).await);

        let blocked = {
            let stop = stop.clone();
            tokio::spawn(async move { publish(&tx, Frame::from(&b"waits"[..]), &stop).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        stop.cancel();
        assert!(!blocked.await.unwrap());
    }

    #[tokio::test]
    async fn publish_fails_when_consumer_dropped() {
        let (tx, rx) = output_channel();
        drop(rx);
        assert!(!publish(&tx, Frame::from(&b"lost"[..]), &CancellationToken::new()).await);
    }
}
