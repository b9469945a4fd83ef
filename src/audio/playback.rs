//! # Audio Playback Engine
//!
//! Plays agent speech one clip at a time. A clip that arrives while another is playing is
//! dropped, not queued: agents speak in turn, and a duplicate delivery must never overlap
//! the one already audible.
//!
//! There is no cancel. A clip ends when its media ends.

use crate::error::ClientResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A platform audio output.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Decode and play one encoded clip (mp3 or wav), resolving when it ends.
    ///
    /// Fails with `ClientError::Playback` on decode or output errors.
    async fn play(&self, payload: Vec<u8>) -> ClientResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The clip played to its natural end
    Finished,
    /// Another clip was already playing; this one was discarded
    Dropped,
}

/// Single-in-flight playback over one [`Speaker`]. Clones share the in-flight flag.
#[derive(Clone)]
pub struct PlaybackEngine {
    speaker: Arc<dyn Speaker>,
    in_flight: Arc<AtomicBool>,
}

/// Proof that the caller holds the one playback slot. Releases it on drop.
pub struct PlaybackSlot {
    speaker: Arc<dyn Speaker>,
    in_flight: Arc<AtomicBool>,
}

impl PlaybackEngine {
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        Self {
            speaker,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the playback slot without awaiting.
    ///
    /// Callers that decide synchronously (inside a socket handler) reserve first and play
    /// later, so two back-to-back deliveries can't both win.
    pub fn try_reserve(&self) -> Option<PlaybackSlot> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PlaybackSlot {
                speaker: Arc::clone(&self.speaker),
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    /// Play a clip unless one is already in flight.
    pub async fn play(&self, payload: Vec<u8>) -> ClientResult<PlaybackOutcome> {
        match self.try_reserve() {
            Some(slot) => slot.play(payload).await,
            None => {
                warn!(bytes = payload.len(), "Playback already in progress, dropping clip");
                Ok(PlaybackOutcome::Dropped)
            }
        }
    }
}

impl PlaybackSlot {
    pub async fn play(self, payload: Vec<u8>) -> ClientResult<PlaybackOutcome> {
        debug!(bytes = payload.len(), "Playing clip");
        self.speaker.play(payload).await?;
        Ok(PlaybackOutcome::Finished)
    }
}

impl Drop for PlaybackSlot {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::RecordingSpeaker;
    use crate::error::ClientError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_clip_is_dropped_while_first_plays() {
        let speaker = Arc::new(RecordingSpeaker::with_duration(Duration::from_millis(100)));
        let engine = PlaybackEngine::new(speaker.clone());

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.play(b"first".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.is_playing());

        let second = engine.play(b"second".to_vec()).await.unwrap();
        assert_eq!(second, PlaybackOutcome::Dropped);

        assert_eq!(first.await.unwrap().unwrap(), PlaybackOutcome::Finished);
        assert!(!engine.is_playing());
        assert_eq!(speaker.played(), vec![b"first".to_vec()]);
    }

    #[tokio::test]
    async fn test_failed_playback_frees_the_slot() {
        let speaker = Arc::new(RecordingSpeaker::failing());
        let engine = PlaybackEngine::new(speaker);

        let result = engine.play(vec![1, 2, 3]).await;
        assert!(matches!(result, Err(ClientError::Playback(_))));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_reservation_is_exclusive() {
        let engine = PlaybackEngine::new(Arc::new(RecordingSpeaker::new()));
        let slot = engine.try_reserve();
        assert!(slot.is_some());
        assert!(engine.try_reserve().is_none());
        drop(slot);
        assert!(engine.try_reserve().is_some());
    }
}
