use tokio::time::Instant;

pub const MIN_PLAYBACK_SPEED: f32 = 0.1;
pub const MAX_PLAYBACK_SPEED: f32 = 10.0;

/// Pacing state for playback.
///
/// While playing, virtual time advances at `speed` times wall time from the
/// anchor instant; pausing snapshots the virtual time. Anchors are rebased
/// on every control action, so readings are continuous across start, pause
/// and speed changes.
#[derive(Debug)]
pub struct PlaybackClock {
    playing: bool,
    speed: f32,
    /// Virtual milliseconds at the anchor instant.
    base_time_ms: u64,
    anchor: Instant,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            playing: false,
            speed: 1.0,
            base_time_ms: 0,
            anchor: Instant::now(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Virtual time in milliseconds since the start of the recording.
    pub fn current_time_ms(&self) -> u64 {
        if self.playing {
            let elapsed = self.anchor.elapsed().as_secs_f64() * 1000.0;
            self.base_time_ms + (elapsed * self.speed as f64) as u64
        } else {
            self.base_time_ms
        }
    }

    pub fn start(&mut self) {
        if self.playing {
            return;
        }
        self.anchor = Instant::now();
        self.playing = true;
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.base_time_ms = self.current_time_ms();
        self.playing = false;
    }

    /// Clamp and apply a new speed without a discontinuity in
    /// [`current_time_ms`]. Returns the old and effective new speed.
    pub fn set_speed(&mut self, speed: f32) -> (f32, f32) {
        let old = self.speed;
        let new = speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
        let was_playing = self.playing;
        self.pause();
        self.speed = new;
        if was_playing {
            self.start();
        }
        (old, new)
    }

    /// Jump the virtual time, preserving the playing/paused polarity.
    pub fn set_time_ms(&mut self, time_ms: u64) {
        let was_playing = self.playing;
        self.pause();
        self.base_time_ms = time_ms;
        if was_playing {
            self.start();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn advances_with_wall_time_while_playing() {
        let mut clock = PlaybackClock::new();
        assert_eq!(clock.current_time_ms(), 0);

        clock.start();
        advance(Duration::from_millis(150)).await;
        assert_eq!(clock.current_time_ms(), 150);

        advance(Duration::from_millis(50)).await;
        assert_eq!(clock.current_time_ms(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_the_reading() {
        let mut clock = PlaybackClock::new();
        clock.start();
        advance(Duration::from_millis(120)).await;
        clock.pause();
        advance(Duration::from_millis(500)).await;
        assert_eq!(clock.current_time_ms(), 120);

        clock.start();
        advance(Duration::from_millis(30)).await;
        assert_eq!(clock.current_time_ms(), 150);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_scales_virtual_time() {
        let mut clock = PlaybackClock::new();
        clock.set_speed(2.0);
        clock.start();
        advance(Duration::from_millis(100)).await;
        assert_eq!(clock.current_time_ms(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_change_is_continuous() {
        let mut clock = PlaybackClock::new();
        clock.start();
        advance(Duration::from_millis(100)).await;
        assert_eq!(clock.current_time_ms(), 100);

        let (old, new) = clock.set_speed(5.0);
        assert_eq!((old, new), (1.0, 5.0));
        assert_eq!(clock.current_time_ms(), 100);

        advance(Duration::from_millis(10)).await;
        assert_eq!(clock.current_time_ms(), 150);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_is_clamped() {
        let mut clock = PlaybackClock::new();
        assert_eq!(clock.set_speed(0.0).1, MIN_PLAYBACK_SPEED);
        assert_eq!(clock.set_speed(100.0).1, MAX_PLAYBACK_SPEED);
    }

    #[tokio::test(start_paused = true)]
    async fn set_time_preserves_polarity() {
        let mut clock = PlaybackClock::new();
        clock.set_time_ms(4000);
        assert!(!clock.is_playing());
        assert_eq!(clock.current_time_ms(), 4000);

        clock.start();
        clock.set_time_ms(1000);
        assert!(clock.is_playing());
        advance(Duration::from_millis(25)).await;
        assert_eq!(clock.current_time_ms(), 1025);
    }
}
