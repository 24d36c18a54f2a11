use tracing::{debug, warn};

use crate::endpoint::{Endpoint, FrameReceiver};

/// Forward frames between two endpoints until either side is done.
///
/// Starts both readers, then relays `first`'s output into `second` and vice
/// versa. The two directions run independently, so a send blocked on one
/// side never stalls reads from the other. Stops when an output closes or a
/// send fails, and terminates both endpoints before returning (`second`
/// first).
pub async fn pipe_endpoints<A, B>(first: &mut A, second: &mut B)
where
    A: Endpoint,
    B: Endpoint,
{
    let (Some(mut from_first), Some(mut from_second)) = (first.output(), second.output()) else {
        warn!("endpoint output already taken, not piping");
        return;
    };

    first.start_reading();
    second.start_reading();

    let (first, second) = (&*first, &*second);
    tokio::select! {
        _ = forward(&mut from_first, second, "first") => {}
        _ = forward(&mut from_second, first, "second") => {}
    }

    second.terminate().await;
    first.terminate().await;
}

async fn forward<E: Endpoint>(from: &mut FrameReceiver, to: &E, source: &'static str) {
    while let Some(frame) = from.recv().await {
        if !to.send(frame).await {
            debug!(source, "frame rejected by receiving endpoint");
            return;
        }
    }
    debug!(source, "endpoint output closed");
}
