//! Playback surface that records play requests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use lyra_stream::{PlaybackError, PlaybackSurface};

#[derive(Clone, Default)]
pub struct RecordingSurface {
    plays: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl RecordingSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface whose `play()` always fails.
    #[must_use]
    pub fn refusing() -> Self {
        let surface = Self::default();
        surface.refuse.store(true, Ordering::SeqCst);
        surface
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

impl PlaybackSurface for RecordingSurface {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PlaybackError("autoplay blocked".into()));
        }
        Ok(())
    }
}
