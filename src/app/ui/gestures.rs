//! Humanized gesture primitives. Nothing here retries; retry policy belongs to the engine.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::app::adb::device::Device;
use crate::app::config::{ScreenBands, SwipeIntensity};
use crate::app::error::AppError;
use crate::app::ui::hierarchy::{Bounds, Point};

pub const MIN_GESTURE: Duration = Duration::from_millis(50);

/// Sleeps scaled by `time_scale` (0 in tests).
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    time_scale: f64,
}

impl Pacer {
    pub fn new(time_scale: f64) -> Self {
        Self {
            time_scale: if time_scale.is_finite() { time_scale.max(0.0) } else { 1.0 },
        }
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn scale(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.time_scale)
    }

    pub fn sleep(&self, duration: Duration) {
        let scaled = self.scale(duration);
        if !scaled.is_zero() {
            thread::sleep(scaled);
        }
    }

    pub fn sleep_secs(&self, secs: f64) {
        self.sleep(Duration::from_secs_f64(secs.max(0.0)));
    }

    /// Sleeps a uniformly random time in `[lo, hi]` seconds; returns the unscaled pick.
    pub fn sleep_between(&self, lo: f64, hi: f64) -> f64 {
        let picked = random_between(lo, hi);
        self.sleep_secs(picked);
        picked
    }
}

pub fn random_between(lo: f64, hi: f64) -> f64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if (hi - lo).abs() < f64::EPSILON {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureProfile {
    /// Arc height as a fraction of the swipe length.
    pub arc: f64,
    /// Max per-axis jitter in pixels for intermediate points.
    pub jitter_px: f64,
    pub min_points: usize,
    pub max_points: usize,
}

impl GestureProfile {
    pub fn for_intensity(intensity: SwipeIntensity) -> Self {
        match intensity {
            SwipeIntensity::Gentle => Self { arc: 0.04, jitter_px: 2.0, min_points: 6, max_points: 9 },
            SwipeIntensity::Normal => Self { arc: 0.08, jitter_px: 4.0, min_points: 8, max_points: 12 },
            SwipeIntensity::Strong => Self { arc: 0.14, jitter_px: 7.0, min_points: 10, max_points: 15 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: i32,
    pub height: i32,
}

impl Screen {
    pub fn clamp(&self, point: Point) -> Point {
        Point::new(
            point.x.clamp(0, (self.width - 1).max(0)),
            point.y.clamp(0, (self.height - 1).max(0)),
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        (0..self.width).contains(&point.x) && (0..self.height).contains(&point.y)
    }
}

/// Sinusoidal arc from `from` to `to` with jittered intermediate points, clamped to the screen.
pub fn curved_path(
    from: Point,
    to: Point,
    profile: GestureProfile,
    screen: Screen,
    rng: &mut impl Rng,
) -> Vec<Point> {
    let lo = profile.min_points.max(2);
    let hi = profile.max_points.max(lo);
    let segments = rng.gen_range(lo..=hi);
    let dx = (to.x - from.x) as f64;
    let dy = (to.y - from.y) as f64;
    let length = dx.hypot(dy);
    let (perp_x, perp_y) = if length > f64::EPSILON {
        (-dy / length, dx / length)
    } else {
        (0.0, 0.0)
    };
    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    let amplitude = sign * profile.arc * length * rng.gen_range(0.5..=1.0);
    let mut path = Vec::with_capacity(segments + 1);
    for index in 0..=segments {
        let t = index as f64 / segments as f64;
        let bend = amplitude * (PI * t).sin();
        let (jx, jy) = if index == 0 || index == segments || profile.jitter_px <= 0.0 {
            (0.0, 0.0)
        } else {
            (
                rng.gen_range(-profile.jitter_px..=profile.jitter_px),
                rng.gen_range(-profile.jitter_px..=profile.jitter_px),
            )
        };
        let x = from.x as f64 + dx * t + perp_x * bend + jx;
        let y = from.y as f64 + dy * t + perp_y * bend + jy;
        path.push(screen.clamp(Point::new(x.round() as i32, y.round() as i32)));
    }
    path
}

pub fn band_value(extent: i32, band: [f64; 2], rng: &mut impl Rng) -> i32 {
    let (lo, hi) = if band[0] <= band[1] { (band[0], band[1]) } else { (band[1], band[0]) };
    let fraction = if (hi - lo).abs() < f64::EPSILON { lo } else { rng.gen_range(lo..=hi) };
    (extent as f64 * fraction).round() as i32
}

/// Uniformly random point inside `bounds` inset by `offset`; the center when the inset collapses it.
pub fn random_point_within(bounds: Bounds, offset: i32, rng: &mut impl Rng) -> Point {
    let offset = offset.max(0);
    if offset * 2 >= bounds.width() || offset * 2 >= bounds.height() {
        return bounds.center();
    }
    let x = rng.gen_range(bounds.left + offset..bounds.right - offset);
    let y = rng.gen_range(bounds.top + offset..bounds.bottom - offset);
    Point::new(x, y)
}

pub struct Gestures {
    device: Arc<dyn Device>,
    screen: Screen,
    profile: GestureProfile,
    bands: ScreenBands,
    pacer: Pacer,
    rng: Mutex<StdRng>,
}

impl Gestures {
    pub fn new(
        device: Arc<dyn Device>,
        screen: Screen,
        intensity: SwipeIntensity,
        bands: ScreenBands,
        pacer: Pacer,
    ) -> Self {
        Self {
            device,
            screen,
            profile: GestureProfile::for_intensity(intensity),
            bands,
            pacer,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn pacer(&self) -> Pacer {
        self.pacer
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        match self.rng.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn tap(&self, at: Point) -> Result<(), AppError> {
        self.device.click(self.screen.clamp(at))
    }

    pub fn tap_random_within(&self, bounds: Bounds, offset: i32) -> Result<Point, AppError> {
        let point = self.with_rng(|rng| random_point_within(bounds, offset, rng));
        let point = self.screen.clamp(point);
        self.device.click(point)?;
        Ok(point)
    }

    /// Executes the arc as short segments whose swipe durations sum to `duration`.
    pub fn curved_swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), AppError> {
        self.follow_path(from, to, duration, self.profile)
    }

    fn follow_path(
        &self,
        from: Point,
        to: Point,
        duration: Duration,
        profile: GestureProfile,
    ) -> Result<(), AppError> {
        let duration = duration.max(MIN_GESTURE);
        let path = self.with_rng(|rng| {
            curved_path(self.screen.clamp(from), self.screen.clamp(to), profile, self.screen, rng)
        });
        let segments = path.len().saturating_sub(1).max(1) as u32;
        let per_segment = (duration / segments).max(Duration::from_millis(1));
        // `input swipe` blocks for its own duration, so segments run back to back.
        for pair in path.windows(2) {
            self.device.swipe(pair[0], pair[1], per_segment)?;
        }
        Ok(())
    }

    /// Arrives at `target` from a nearby random offset instead of teleporting.
    pub fn curved_tap(&self, target: Point) -> Result<(), AppError> {
        let (start, millis) = self.with_rng(|rng| {
            let angle = rng.gen_range(0.0..(2.0 * PI));
            let distance = rng.gen_range(30.0..80.0);
            let start = Point::new(
                target.x + (angle.cos() * distance).round() as i32,
                target.y + (angle.sin() * distance).round() as i32,
            );
            (start, rng.gen_range(60..=140))
        });
        let gentle = GestureProfile::for_intensity(SwipeIntensity::Gentle);
        self.follow_path(start, target, Duration::from_millis(millis), gentle)
    }

    /// Finger moves down the screen: upper band to lower band.
    pub fn scroll_up(&self, duration: Duration) -> Result<(Point, Point), AppError> {
        let (from, to) = self.with_rng(|rng| {
            let x1 = band_value(self.screen.width, self.bands.horizontal, rng);
            let x2 = band_value(self.screen.width, self.bands.horizontal, rng);
            let y1 = band_value(self.screen.height, self.bands.upper, rng);
            let y2 = band_value(self.screen.height, self.bands.lower, rng);
            (Point::new(x1, y1), Point::new(x2, y2))
        });
        self.curved_swipe(from, to, duration)?;
        Ok((from, to))
    }

    /// Finger moves up the screen: lower band to upper band.
    pub fn scroll_down(&self, duration: Duration) -> Result<(Point, Point), AppError> {
        let (from, to) = self.with_rng(|rng| {
            let x1 = band_value(self.screen.width, self.bands.horizontal, rng);
            let x2 = band_value(self.screen.width, self.bands.horizontal, rng);
            let y1 = band_value(self.screen.height, self.bands.lower, rng);
            let y2 = band_value(self.screen.height, self.bands.upper, rng);
            (Point::new(x1, y1), Point::new(x2, y2))
        });
        self.curved_swipe(from, to, duration)?;
        Ok((from, to))
    }

    /// Straight-ish drag with a caller-chosen vector, e.g. expanding a bottom sheet.
    pub fn drag(&self, from: Point, to: Point, duration: Duration) -> Result<(), AppError> {
        let gentle = GestureProfile::for_intensity(SwipeIntensity::Gentle);
        self.follow_path(from, to, duration, gentle)
    }

    /// 2-4 small left/right drags inside `bounds`; returns how many were made.
    pub fn scrub(&self, bounds: Bounds) -> Result<u32, AppError> {
        let plan: Vec<(Point, Point, u64)> = self.with_rng(|rng| {
            let count = rng.gen_range(2..=4);
            (0..count)
                .map(|_| {
                    let center = bounds.center();
                    let span = (bounds.width() as f64 * rng.gen_range(0.1..0.25)).round() as i32;
                    let start_x = center.x + rng.gen_range(-(bounds.width() / 6).max(1)..=(bounds.width() / 6).max(1));
                    let direction = if rng.gen_bool(0.5) { 1 } else { -1 };
                    let end_x = (start_x + direction * span).clamp(bounds.left, (bounds.right - 1).max(bounds.left));
                    (
                        Point::new(start_x, center.y),
                        Point::new(end_x, center.y + rng.gen_range(-3..=3)),
                        rng.gen_range(250..=600),
                    )
                })
                .collect()
        });
        let gentle = GestureProfile::for_intensity(SwipeIntensity::Gentle);
        for (from, to, millis) in &plan {
            self.follow_path(*from, *to, Duration::from_millis(*millis), gentle)?;
            self.pacer.sleep_between(0.2, 0.6);
        }
        Ok(plan.len() as u32)
    }
}
