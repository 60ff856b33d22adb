//! Aggregation of desired video qualities across all consumers of a track.
//!
//! Local subscribers and peer media nodes each advertise the maximum quality
//! they want. The tracker folds both into the single maximum the publisher
//! must keep producing and reports effective changes through a registered
//! callback. Audio tracks never participate; every operation is a no-op for
//! them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use confab_core::types::{NodeId, ParticipantId, TrackKind, VideoQuality};

/// One entry of the layer-enable descriptor handed to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedQuality {
    pub quality: VideoQuality,
    pub enabled: bool,
}

/// Callback the publisher registers to learn which layers to produce.
pub type QualityChangeHandler = dyn Fn(Vec<SubscribedQuality>, VideoQuality) + Send + Sync;

struct State {
    by_subscriber: HashMap<ParticipantId, VideoQuality>,
    by_node: HashMap<NodeId, VideoQuality>,
    current_max: VideoQuality,
    initial_timer: Option<JoinHandle<()>>,
    on_change: Option<Arc<QualityChangeHandler>>,
}

/// Tracks the maximum subscribed quality for one published track.
pub struct MaxQualityTracker {
    kind: TrackKind,
    initial_wait: Duration,
    state: RwLock<State>,
}

impl MaxQualityTracker {
    pub fn new(kind: TrackKind, initial_wait: Duration) -> Self {
        Self {
            kind,
            initial_wait,
            state: RwLock::new(State {
                by_subscriber: HashMap::new(),
                by_node: HashMap::new(),
                current_max: VideoQuality::Off,
                initial_timer: None,
                on_change: None,
            }),
        }
    }

    /// Register the publisher's callback. Replaces any previous one.
    pub fn on_change(&self, f: impl Fn(Vec<SubscribedQuality>, VideoQuality) + Send + Sync + 'static) {
        self.state.write().on_change = Some(Arc::new(f));
    }

    pub fn current_max(&self) -> VideoQuality {
        self.state.read().current_max
    }

    /// Number of spatial layers currently enabled for the publisher.
    pub fn num_enabled_layers(&self) -> u32 {
        let max = self.state.read().current_max;
        max.spatial_layer().map_or(0, |layer| u32::from(layer) + 1)
    }

    /// Record what `subscriber_id` wants. `Off` retracts the entry.
    pub fn notify_subscriber(&self, subscriber_id: ParticipantId, quality: VideoQuality) {
        if self.kind != TrackKind::Video {
            return;
        }

        {
            let mut state = self.state.write();
            if quality == VideoQuality::Off {
                if state.by_subscriber.remove(&subscriber_id).is_none() {
                    return;
                }
            } else {
                if state.by_subscriber.get(&subscriber_id) == Some(&quality) {
                    return;
                }
                state.by_subscriber.insert(subscriber_id, quality);
            }
        }

        self.recompute();
    }

    /// Record the aggregate request of a peer node. `Off` retracts it.
    pub fn notify_node(&self, node_id: NodeId, quality: VideoQuality) {
        if self.kind != TrackKind::Video {
            return;
        }

        {
            let mut state = self.state.write();
            if quality == VideoQuality::Off {
                if state.by_node.remove(&node_id).is_none() {
                    return;
                }
            } else {
                if state.by_node.get(&node_id) == Some(&quality) {
                    return;
                }
                state.by_node.insert(node_id, quality);
            }
        }

        self.recompute();
    }

    /// Arm (or replace) the one-shot deferred recomputation that runs
    /// `initial_wait` after track creation, so early joiners get a chance
    /// to advertise real desired qualities before the publisher is
    /// throttled.
    pub fn start_initial_timer(self: &Arc<Self>) {
        if self.kind != TrackKind::Video {
            return;
        }

        let tracker = Arc::downgrade(self);
        let wait = self.initial_wait;
        let mut state = self.state.write();
        if let Some(previous) = state.initial_timer.take() {
            previous.abort();
        }
        state.initial_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.state.write().initial_timer = None;
                tracker.recompute();
            }
        }));
    }

    /// Cancel the pending deferred recomputation, if any.
    pub fn stop_initial_timer(&self) {
        let mut state = self.state.write();
        if let Some(timer) = state.initial_timer.take() {
            timer.abort();
        }
    }

    /// Re-derive the maximum over both maps and, on an effective change,
    /// invoke the registered callback with a fresh layer descriptor. The
    /// callback runs strictly after the state lock is released.
    pub fn recompute(&self) {
        if self.kind != TrackKind::Video {
            return;
        }

        let (descriptor, new_max, handler) = {
            let mut state = self.state.write();
            let new_max = state
                .by_subscriber
                .values()
                .chain(state.by_node.values())
                .copied()
                .max()
                .unwrap_or(VideoQuality::Off);

            if new_max == state.current_max {
                return;
            }
            state.current_max = new_max;

            (build_descriptor(new_max), new_max, state.on_change.clone())
        };

        if let Some(handler) = handler {
            handler(descriptor, new_max);
        }
    }
}

impl Drop for MaxQualityTracker {
    fn drop(&mut self) {
        if let Some(timer) = self.state.write().initial_timer.take() {
            timer.abort();
        }
    }
}

/// Layer-enable pairs for the publisher: when nothing is wanted, all three
/// layers are explicitly disabled so the encoders can stop; otherwise each
/// layer up to the maximum is enabled.
fn build_descriptor(max: VideoQuality) -> Vec<SubscribedQuality> {
    VideoQuality::LAYERS
        .iter()
        .map(|&quality| SubscribedQuality {
            quality,
            enabled: max != VideoQuality::Off && quality <= max,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Report = (Vec<SubscribedQuality>, VideoQuality);

    fn video_tracker() -> Arc<MaxQualityTracker> {
        Arc::new(MaxQualityTracker::new(
            TrackKind::Video,
            Duration::from_secs(10),
        ))
    }

    fn recording(tracker: &MaxQualityTracker) -> Arc<Mutex<Vec<Report>>> {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        tracker.on_change(move |descriptor, max| {
            sink.lock().unwrap().push((descriptor, max));
        });
        reports
    }

    fn enabled(descriptor: &[SubscribedQuality]) -> Vec<bool> {
        descriptor.iter().map(|q| q.enabled).collect()
    }

    #[test]
    fn max_follows_both_maps() {
        let tracker = video_tracker();
        let reports = recording(&tracker);

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::Low);
        tracker.notify_subscriber(ParticipantId::from("b"), VideoQuality::Medium);

        assert_eq!(tracker.current_max(), VideoQuality::Medium);
        let reports = reports.lock().unwrap();
        let (descriptor, max) = reports.last().unwrap();
        assert_eq!(*max, VideoQuality::Medium);
        assert_eq!(enabled(descriptor), vec![true, true, false]);
    }

    #[test]
    fn retracting_last_entry_reports_all_disabled() {
        let tracker = video_tracker();
        let reports = recording(&tracker);

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::High);
        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::Off);

        assert_eq!(tracker.current_max(), VideoQuality::Off);
        let reports = reports.lock().unwrap();
        let (descriptor, max) = reports.last().unwrap();
        assert_eq!(*max, VideoQuality::Off);
        assert_eq!(enabled(descriptor), vec![false, false, false]);
        assert_eq!(
            descriptor.iter().map(|q| q.quality).collect::<Vec<_>>(),
            VideoQuality::LAYERS.to_vec()
        );
    }

    #[test]
    fn node_retraction_falls_back_to_subscribers() {
        let tracker = video_tracker();
        recording(&tracker);

        tracker.notify_node(NodeId::from("n1"), VideoQuality::Medium);
        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::Low);
        assert_eq!(tracker.current_max(), VideoQuality::Medium);

        tracker.notify_node(NodeId::from("n1"), VideoQuality::Off);
        assert_eq!(tracker.current_max(), VideoQuality::Low);
    }

    #[test]
    fn audio_tracks_never_report() {
        let tracker = Arc::new(MaxQualityTracker::new(
            TrackKind::Audio,
            Duration::from_secs(10),
        ));
        let reports = recording(&tracker);

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::High);
        tracker.notify_node(NodeId::from("n1"), VideoQuality::High);
        tracker.recompute();

        assert_eq!(tracker.current_max(), VideoQuality::Off);
        assert!(reports.lock().unwrap().is_empty());
    }

    #[test]
    fn no_redundant_reports_for_equal_max() {
        let tracker = video_tracker();
        let reports = recording(&tracker);

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::High);
        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::High);
        tracker.notify_subscriber(ParticipantId::from("b"), VideoQuality::Medium);
        tracker.recompute();

        assert_eq!(reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn off_for_unknown_subscriber_is_a_noop() {
        let tracker = video_tracker();
        let reports = recording(&tracker);

        tracker.notify_subscriber(ParticipantId::from("ghost"), VideoQuality::Off);

        assert!(reports.lock().unwrap().is_empty());
        assert_eq!(tracker.current_max(), VideoQuality::Off);
    }

    #[test]
    fn enabled_layer_count_tracks_max() {
        let tracker = video_tracker();
        assert_eq!(tracker.num_enabled_layers(), 0);

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::Medium);
        assert_eq!(tracker.num_enabled_layers(), 2);

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::High);
        assert_eq!(tracker.num_enabled_layers(), 3);
    }

    #[test]
    fn callback_may_reenter_the_tracker() {
        let tracker = video_tracker();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let inner = tracker.clone();
        tracker.on_change(move |_, max| {
            // The state lock is released before the callback runs, so
            // reading back through the tracker must not deadlock.
            sink.lock().unwrap().push((max, inner.current_max()));
        });

        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::Medium);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(VideoQuality::Medium, VideoQuality::Medium)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initial_timer_defers_recompute() {
        let tracker = video_tracker();
        let reports = recording(&tracker);

        // Seed a desired quality, then reset current_max bookkeeping by
        // retracting: the timer must pick up whatever the maps hold when
        // it fires.
        tracker.start_initial_timer();
        tracker.notify_subscriber(ParticipantId::from("a"), VideoQuality::High);
        assert_eq!(reports.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        // Timer fired but max was unchanged, so no redundant report.
        assert_eq!(reports.lock().unwrap().len(), 1);
        assert_eq!(tracker.current_max(), VideoQuality::High);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_timer() {
        let tracker = video_tracker();
        tracker.start_initial_timer();
        tracker.stop_initial_timer();

        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert!(tracker.state.read().initial_timer.is_none());
        assert_eq!(tracker.current_max(), VideoQuality::Off);
    }
}
