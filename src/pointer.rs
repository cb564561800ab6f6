//! Simulated pointer movement
//!
//! Some widgets only react to a real sequence of pointer events (hover, then
//! press, then release). This is the last rung of the click ladder: walk the
//! pointer along a Bezier curve to the target and click there.

use rand::Rng;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::time::Duration;
use tokio::time::sleep;

use crate::cdp::{MouseEvent, MouseEventType, Session};
use crate::error::Result;

thread_local! {
    static RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::thread_rng());
}

/// How quickly the pointer travels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PointerSpeed {
    Fast,
    #[default]
    Normal,
    Slow,
}

impl PointerSpeed {
    fn path_points(&self, distance: f64) -> usize {
        match self {
            PointerSpeed::Fast => (distance / 50.0).clamp(3.0, 10.0) as usize,
            PointerSpeed::Normal => (distance / 10.0).clamp(10.0, 50.0) as usize,
            PointerSpeed::Slow => (distance / 5.0).clamp(20.0, 100.0) as usize,
        }
    }

    fn step_delay_ms(&self) -> (u64, u64) {
        match self {
            PointerSpeed::Fast => (1, 5),
            PointerSpeed::Normal => (5, 25),
            PointerSpeed::Slow => (10, 50),
        }
    }
}

fn random_range(min: u64, max: u64) -> u64 {
    RNG.with(|rng| rng.borrow_mut().gen_range(min..max))
}

fn random_f64_range(min: f64, max: f64) -> f64 {
    RNG.with(|rng| rng.borrow_mut().gen_range(min..max))
}

type Point = (f64, f64);

/// Stack-allocated storage for typical paths
type PointVec = SmallVec<[Point; 64]>;

/// Cubic Bezier from `start` to `end` with jittered control points
fn bezier_path(start: Point, end: Point, num_points: usize) -> PointVec {
    let num_points = num_points.max(2);

    let cp1 = (
        start.0 + (end.0 - start.0) * random_f64_range(0.2, 0.4) + random_f64_range(-50.0, 50.0),
        start.1 + (end.1 - start.1) * random_f64_range(0.0, 0.3) + random_f64_range(-50.0, 50.0),
    );
    let cp2 = (
        start.0 + (end.0 - start.0) * random_f64_range(0.6, 0.8) + random_f64_range(-50.0, 50.0),
        start.1 + (end.1 - start.1) * random_f64_range(0.7, 1.0) + random_f64_range(-50.0, 50.0),
    );

    (0..num_points)
        .map(|i| {
            let t = i as f64 / (num_points - 1) as f64;
            let mt = 1.0 - t;
            let a = mt * mt * mt;
            let b = 3.0 * mt * mt * t;
            let c = 3.0 * mt * t * t;
            let d = t * t * t;
            (
                a * start.0 + b * cp1.0 + c * cp2.0 + d * end.0,
                a * start.1 + b * cp1.1 + c * cp2.1 + d * end.1,
            )
        })
        .collect()
}

/// Pointer driver bound to one CDP session
pub struct Pointer<'a> {
    session: &'a Session,
    speed: PointerSpeed,
}

impl<'a> Pointer<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            speed: PointerSpeed::Normal,
        }
    }

    pub fn with_speed(mut self, speed: PointerSpeed) -> Self {
        self.speed = speed;
        self
    }

    /// Move to (`target_x`, `target_y`) along a curve, then click
    pub async fn move_and_click(&self, target_x: f64, target_y: f64) -> Result<()> {
        let start = (random_f64_range(100.0, 800.0), random_f64_range(100.0, 600.0));
        let distance = ((target_x - start.0).powi(2) + (target_y - start.1).powi(2)).sqrt();
        let (min_delay, max_delay) = self.speed.step_delay_ms();

        let path = bezier_path(start, (target_x, target_y), self.speed.path_points(distance));
        for (x, y) in path {
            self.session
                .dispatch_mouse_event(MouseEvent::moved(x, y))
                .await?;
            sleep(Duration::from_millis(random_range(min_delay, max_delay))).await;
        }

        // Hover long enough for mouseover handlers to run
        sleep(Duration::from_millis(random_range(50, 150))).await;

        for event in [MouseEventType::MousePressed, MouseEventType::MouseReleased] {
            self.session
                .dispatch_mouse_event(MouseEvent::left(event, target_x, target_y))
                .await?;
            sleep(Duration::from_millis(random_range(40, 100))).await;
        }

        Ok(())
    }
}
