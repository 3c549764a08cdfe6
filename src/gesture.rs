//! Touch gesture recognition. Raw controller samples go in every frame;
//! a tap or directional swipe comes out at the moment of release.

use std::time::{Duration, Instant};

/// One reading of the touch controller. When `present` is false the finger
/// is up and the coordinates are meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchSample {
    pub x: i32,
    pub y: i32,
    pub present: bool,
}

impl TouchSample {
    pub fn at(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            present: true,
        }
    }

    pub fn released() -> Self {
        Self {
            x: 0,
            y: 0,
            present: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    Tap,
    SwipeLeft,
    SwipeRight,
    SwipeUp,
    SwipeDown,
}

#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// A swipe must complete within this window.
    pub max_swipe_duration: Duration,
    /// Dominant-axis travel required for a swipe.
    pub min_swipe_distance: i32,
    /// Maximum travel on both axes for a tap. Taps have no time bound; a
    /// long press that stays put still counts.
    pub tap_slop: i32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            max_swipe_duration: Duration::from_millis(500),
            min_swipe_distance: 50,
            tap_slop: 10,
        }
    }
}

/// Coordinate transform for a panel mounted 90° clockwise relative to the
/// touch controller: `(x, y)` becomes `(y, panel_width - x)`.
pub fn rotate(panel_width: i32) -> impl Fn(i32, i32) -> (i32, i32) {
    move |x, y| (y, panel_width - x)
}

/// An in-progress touch, from first contact to the current sample.
struct Tracking {
    start: (i32, i32),
    last: (i32, i32),
    started_at: Instant,
}

/// Classifies a stream of [`TouchSample`]s into [`GestureEvent`]s.
///
/// Only the primary touch point is considered; callers with multi-touch
/// hardware pick one point per frame. Coordinates pass through an
/// injectable transform (identity by default, see [`rotate`]) before any
/// thresholding, so all thresholds are in display space.
pub struct GestureRecognizer {
    config: GestureConfig,
    transform: Box<dyn Fn(i32, i32) -> (i32, i32)>,
    tracking: Option<Tracking>,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            transform: Box::new(|x, y| (x, y)),
            tracking: None,
        }
    }

    /// Replaces the identity coordinate transform.
    pub fn with_transform(
        mut self,
        transform: impl Fn(i32, i32) -> (i32, i32) + 'static,
    ) -> Self {
        self.transform = Box::new(transform);
        self
    }

    /// Feeds one sample. Returns a gesture only on the release sample that
    /// ends a touch.
    pub fn update(&mut self, sample: TouchSample) -> Option<GestureEvent> {
        self.update_at(sample, Instant::now())
    }

    /// [`update`](Self::update) with an explicit clock.
    pub fn update_at(&mut self, sample: TouchSample, now: Instant) -> Option<GestureEvent> {
        if sample.present {
            let point = (self.transform)(sample.x, sample.y);
            match &mut self.tracking {
                Some(tracking) => tracking.last = point,
                None => {
                    self.tracking = Some(Tracking {
                        start: point,
                        last: point,
                        started_at: now,
                    });
                }
            }
            return None;
        }

        let tracking = self.tracking.take()?;
        let dx = tracking.last.0 - tracking.start.0;
        let dy = tracking.last.1 - tracking.start.1;
        self.classify(dx, dy, now.duration_since(tracking.started_at))
    }

    fn classify(&self, dx: i32, dy: i32, duration: Duration) -> Option<GestureEvent> {
        if duration <= self.config.max_swipe_duration {
            // horizontal wins only on strictly dominant x travel
            if dx.abs() > dy.abs() && dx.abs() >= self.config.min_swipe_distance {
                return Some(if dx < 0 {
                    GestureEvent::SwipeLeft
                } else {
                    GestureEvent::SwipeRight
                });
            }
            if dy.abs() >= self.config.min_swipe_distance {
                return Some(if dy < 0 {
                    GestureEvent::SwipeUp
                } else {
                    GestureEvent::SwipeDown
                });
            }
        }

        if dx.abs() <= self.config.tap_slop && dy.abs() <= self.config.tap_slop {
            return Some(GestureEvent::Tap);
        }
        // in-between movement is ambiguous and dropped
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn recognizer() -> GestureRecognizer {
        GestureRecognizer::new(GestureConfig::default())
    }

    /// Drives touch-move-release with explicit timestamps.
    fn run(
        recognizer: &mut GestureRecognizer,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Option<GestureEvent> {
        let t0 = Instant::now();
        assert_eq!(recognizer.update_at(TouchSample::at(from.0, from.1), t0), None);
        assert_eq!(
            recognizer.update_at(TouchSample::at(to.0, to.1), t0 + duration / 2),
            None
        );
        recognizer.update_at(TouchSample::released(), t0 + duration)
    }

    #[test]
    fn quick_tap() {
        let mut recognizer = recognizer();
        assert_eq!(
            run(&mut recognizer, (100, 80), (103, 82), ms(80)),
            Some(GestureEvent::Tap)
        );
    }

    #[test]
    fn long_hold_still_counts_as_tap() {
        let mut recognizer = recognizer();
        assert_eq!(
            run(&mut recognizer, (100, 80), (97, 81), ms(800)),
            Some(GestureEvent::Tap)
        );
    }

    #[test]
    fn swipes_in_all_four_directions() {
        let mut recognizer = recognizer();
        assert_eq!(
            run(&mut recognizer, (40, 80), (140, 84), ms(200)),
            Some(GestureEvent::SwipeRight)
        );
        assert_eq!(
            run(&mut recognizer, (140, 80), (30, 78), ms(200)),
            Some(GestureEvent::SwipeLeft)
        );
        assert_eq!(
            run(&mut recognizer, (80, 40), (83, 140), ms(200)),
            Some(GestureEvent::SwipeDown)
        );
        assert_eq!(
            run(&mut recognizer, (80, 140), (82, 30), ms(200)),
            Some(GestureEvent::SwipeUp)
        );
    }

    #[test]
    fn vertical_wins_unless_x_strictly_dominates() {
        let mut recognizer = recognizer();
        // 60px of x travel but 80px of y: a down swipe, not a right one
        assert_eq!(
            run(&mut recognizer, (0, 0), (60, 80), ms(200)),
            Some(GestureEvent::SwipeDown)
        );
    }

    #[test]
    fn slow_movement_is_not_a_swipe() {
        let mut recognizer = recognizer();
        assert_eq!(run(&mut recognizer, (40, 80), (140, 80), ms(800)), None);
    }

    #[test]
    fn ambiguous_drag_is_dropped() {
        let mut recognizer = recognizer();
        // too far for a tap, too short for a swipe
        assert_eq!(run(&mut recognizer, (100, 80), (130, 80), ms(100)), None);
    }

    #[test]
    fn release_without_touch_is_a_noop() {
        let mut recognizer = recognizer();
        assert_eq!(recognizer.update_at(TouchSample::released(), Instant::now()), None);
        assert_eq!(recognizer.update_at(TouchSample::released(), Instant::now()), None);
    }

    #[test]
    fn tracking_resets_between_gestures() {
        let mut recognizer = recognizer();
        assert_eq!(
            run(&mut recognizer, (100, 80), (101, 80), ms(50)),
            Some(GestureEvent::Tap)
        );
        assert_eq!(
            run(&mut recognizer, (40, 80), (140, 80), ms(200)),
            Some(GestureEvent::SwipeRight)
        );
    }

    #[test]
    fn rotation_maps_into_display_space() {
        assert_eq!(rotate(172)(10, 20), (20, 162));

        // a swipe along the controller's y axis reads as horizontal
        let mut recognizer =
            GestureRecognizer::new(GestureConfig::default()).with_transform(rotate(172));
        assert_eq!(
            run(&mut recognizer, (86, 40), (86, 160), ms(200)),
            Some(GestureEvent::SwipeRight)
        );
    }
}
