//! Magnifier driver.
//!
//! Owns the configured viewports and the host surfaces showing them, and on
//! every tick feeds each surface the source rectangle the tracker computes
//! for the current cursor position.

use crate::error::{MagnifierError, Result};
use crate::platform::{Host, Subsystem, SurfaceId};
use crate::timer::Ticker;
use crate::tracker::{compute_source_rect, Viewport};
use crate::utils::Rect;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    /// A surface rejected its source; ticks are ignored until `stop`.
    Halted,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSurface {
    id: SurfaceId,
    viewport: Viewport,
}

pub struct Magnifier<H: Host> {
    host: H,
    viewports: Vec<Viewport>,
    surfaces: Vec<ActiveSurface>,
    subsystem: Subsystem,
    // True while the driver holds its own reference on the subsystem
    session: bool,
    state: State,
}

impl<H: Host> Magnifier<H> {
    pub fn new(host: H, viewports: Vec<Viewport>) -> Self {
        Self {
            host,
            viewports,
            surfaces: Vec::new(),
            subsystem: Subsystem::new(),
            session: false,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Bring up the subsystem and one surface per viewport.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Running => return Ok(()),
            State::Halted => self.stop(),
            State::Idle => {}
        }

        if let Err(e) = self.subsystem.acquire(&mut self.host) {
            return Err(self.fail(MagnifierError::InitializationFailure(format!("{:#}", e))));
        }
        self.session = true;

        for index in 0..self.viewports.len() {
            let viewport = self.viewports[index];
            let zoom = viewport.zoom_factor();

            let id = match self.host.create_surface(index, zoom) {
                Ok(id) => id,
                Err(e) => {
                    let err = MagnifierError::SurfaceCreationFailure {
                        index,
                        reason: format!("{:#}", e),
                    };
                    self.teardown();
                    return Err(self.fail(err));
                }
            };
            // Already initialized by the session reference, cannot fail
            if let Err(e) = self.subsystem.acquire(&mut self.host) {
                log::warn!("Unexpected subsystem failure: {:#}", e);
            }
            self.surfaces.push(ActiveSurface { id, viewport });

            if let Err(e) = self.host.set_transform(id, zoom) {
                log::warn!("Failed to set {}x magnification on surface {}: {:#}", zoom, index, e);
            }
            log::debug!(
                "Surface {} ready at {}x (base sample width {})",
                index,
                zoom,
                viewport.base_sample_width()
            );
        }

        self.state = State::Running;
        log::info!(
            "Magnifier started with {} surfaces ({} subsystem references)",
            self.surfaces.len(),
            self.subsystem.references()
        );
        Ok(())
    }

    /// One periodic update. Returns the source rectangle given to each
    /// surface, in surface order.
    pub fn tick(&mut self) -> Result<Vec<Rect>> {
        if self.state != State::Running {
            return Ok(Vec::new());
        }

        let cursor = self.host.cursor_position();
        let screen = self.host.display_bounds_containing(cursor);

        let mut rects = Vec::with_capacity(self.surfaces.len());
        let mut rejected = None;
        for (index, surface) in self.surfaces.iter().enumerate() {
            let rect = compute_source_rect(cursor, screen, &surface.viewport);
            if let Err(e) = self.host.set_source(surface.id, rect) {
                rejected = Some(MagnifierError::SampleRejected {
                    index,
                    rect,
                    reason: format!("{:#}", e),
                });
                break;
            }
            rects.push(rect);
        }

        if let Some(err) = rejected {
            self.state = State::Halted;
            return Err(self.fail(err));
        }

        log::trace!(
            "Tick: cursor ({}, {}) on {} -> {:?}",
            cursor.x,
            cursor.y,
            screen,
            rects
        );
        Ok(rects)
    }

    /// Destroy all surfaces and release the subsystem. Safe to call any
    /// number of times.
    pub fn stop(&mut self) {
        if self.state == State::Idle && !self.session && self.surfaces.is_empty() {
            return;
        }
        self.teardown();
        self.state = State::Idle;
        log::info!("Magnifier stopped");
    }

    /// Start, then tick every `interval` while pumping host events, until
    /// `running` clears, the host goes away or a surface fails.
    pub fn run(&mut self, running: &AtomicBool, interval: Duration) -> anyhow::Result<()> {
        self.start()?;

        let mut ticker = Ticker::new(interval, Instant::now());
        log::info!("Updating every {:?}", ticker.interval());

        let outcome = loop {
            if !running.load(Ordering::SeqCst) {
                log::info!("Shutting down...");
                break Ok(());
            }

            if ticker.poll(Instant::now()) {
                if let Err(e) = self.tick() {
                    break Err(e.into());
                }
            }

            match self.host.dispatch(ticker.timeout(Instant::now())) {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("Host closed");
                    break Ok(());
                }
                Err(e) => {
                    log::error!("Failed to dispatch events: {:#}", e);
                    break Err(e);
                }
            }
        };

        log::debug!("Driver loop ended in {:?} state", self.state());
        self.stop();
        outcome
    }

    fn teardown(&mut self) {
        for surface in std::mem::take(&mut self.surfaces) {
            self.host.destroy_surface(surface.id);
            self.subsystem.release(&mut self.host);
        }
        if self.session {
            self.session = false;
            self.subsystem.release(&mut self.host);
        }
    }

    fn fail(&mut self, error: MagnifierError) -> MagnifierError {
        self.host.notify(&error);
        error
    }
}

impl<H: Host> Drop for Magnifier<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::{Call, FakeHost};
    use crate::tracker::DEFAULT_BASE_SAMPLE_WIDTH;
    use crate::utils::Point;

    const SCREEN: Rect = Rect::new(0, 0, 1920, 1080);

    fn viewports() -> Vec<Viewport> {
        vec![
            Viewport::new(4.0, DEFAULT_BASE_SAMPLE_WIDTH).unwrap(),
            Viewport::new(1.0, DEFAULT_BASE_SAMPLE_WIDTH).unwrap(),
        ]
    }

    fn magnifier(host: FakeHost) -> Magnifier<FakeHost> {
        Magnifier::new(host, viewports())
    }

    #[test]
    fn test_start_creates_surfaces_with_transforms() {
        let mut mag = magnifier(FakeHost::new(SCREEN, Point::new(960, 540)));
        mag.start().unwrap();

        assert_eq!(mag.state(), State::Running);
        let host = mag.host();
        assert_eq!(host.count(|c| *c == Call::Initialize), 1);
        assert_eq!(host.count(|c| matches!(c, Call::CreateSurface(_))), 2);
        assert!(host
            .calls
            .borrow()
            .contains(&Call::SetTransform(SurfaceId(0), 4.0)));
        assert!(host
            .calls
            .borrow()
            .contains(&Call::SetTransform(SurfaceId(1), 1.0)));
    }

    #[test]
    fn test_tick_feeds_each_surface_its_own_rect() {
        let mut mag = magnifier(FakeHost::new(SCREEN, Point::new(960, 540)));
        mag.start().unwrap();

        let rects = mag.tick().unwrap();
        assert_eq!(rects, vec![Rect::new(910, 512, 1010, 568), Rect::new(760, 428, 1160, 652)]);
        assert!(mag
            .host()
            .calls
            .borrow()
            .contains(&Call::SetSource(SurfaceId(0), rects[0])));
    }

    #[test]
    fn test_tick_clamps_at_screen_corner() {
        let mut mag = magnifier(FakeHost::new(SCREEN, Point::new(0, 0)));
        mag.start().unwrap();

        let rects = mag.tick().unwrap();
        assert_eq!(rects[0], Rect::new(0, 0, 100, 56));
        assert_eq!(rects[1], Rect::new(0, 0, 400, 224));
    }

    #[test]
    fn test_tick_before_start_does_nothing() {
        let mut mag = magnifier(FakeHost::new(SCREEN, Point::new(0, 0)));
        assert!(mag.tick().unwrap().is_empty());
        assert_eq!(mag.host().count(|c| matches!(c, Call::SetSource(..))), 0);
    }

    #[test]
    fn test_stop_uninitializes_exactly_once() {
        let mut mag = magnifier(FakeHost::new(SCREEN, Point::new(0, 0)));
        mag.start().unwrap();
        mag.stop();
        mag.stop();

        let host = mag.host();
        assert_eq!(host.count(|c| matches!(c, Call::DestroySurface(_))), 2);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
        assert_eq!(mag.state(), State::Idle);
    }

    #[test]
    fn test_drop_releases_subsystem() {
        let host = FakeHost::new(SCREEN, Point::new(0, 0));
        let log = host.log();
        {
            let mut mag = magnifier(host);
            mag.start().unwrap();
        }
        let calls = log.borrow();
        assert_eq!(calls.iter().filter(|c| **c == Call::Uninitialize).count(), 1);
        assert_eq!(calls.last(), Some(&Call::Uninitialize));
    }

    #[test]
    fn test_initialization_failure_is_reported() {
        let mut host = FakeHost::new(SCREEN, Point::new(0, 0));
        host.fail_initialize = true;
        let mut mag = magnifier(host);

        let err = mag.start().unwrap_err();
        assert!(matches!(err, MagnifierError::InitializationFailure(_)));
        assert_eq!(mag.state(), State::Idle);

        let host = mag.host();
        assert_eq!(host.count(|c| matches!(c, Call::Notify(_))), 1);
        assert_eq!(host.count(|c| matches!(c, Call::CreateSurface(_))), 0);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 0);
    }

    #[test]
    fn test_surface_creation_failure_releases_subsystem() {
        let mut host = FakeHost::new(SCREEN, Point::new(0, 0));
        host.fail_create_at = Some(1);
        let mut mag = magnifier(host);

        let err = mag.start().unwrap_err();
        assert!(matches!(
            err,
            MagnifierError::SurfaceCreationFailure { index: 1, .. }
        ));
        assert_eq!(mag.state(), State::Idle);

        let host = mag.host();
        assert_eq!(host.count(|c| *c == Call::DestroySurface(SurfaceId(0))), 1);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
        assert_eq!(host.count(|c| matches!(c, Call::Notify(_))), 1);
        drop(mag);
    }

    #[test]
    fn test_rejected_transform_does_not_abort_start() {
        let mut host = FakeHost::new(SCREEN, Point::new(0, 0));
        host.fail_transform = true;
        let mut mag = magnifier(host);

        mag.start().unwrap();
        assert_eq!(mag.state(), State::Running);
    }

    #[test]
    fn test_rejected_sample_halts_ticking() {
        let mut host = FakeHost::new(SCREEN, Point::new(500, 500));
        host.reject_source_at = Some(1);
        let mut mag = magnifier(host);
        mag.start().unwrap();

        let err = mag.tick().unwrap_err();
        assert!(matches!(err, MagnifierError::SampleRejected { index: 1, .. }));
        assert_eq!(mag.state(), State::Halted);
        assert_eq!(mag.host().count(|c| matches!(c, Call::Notify(_))), 1);

        // No further sampling once halted
        assert!(mag.tick().unwrap().is_empty());
        assert_eq!(mag.host().count(|c| matches!(c, Call::SetSource(..))), 2);

        mag.stop();
        assert_eq!(mag.host().count(|c| *c == Call::Uninitialize), 1);
    }

    #[test]
    fn test_restart_after_halt() {
        let mut host = FakeHost::new(SCREEN, Point::new(500, 500));
        host.reject_source_at = Some(0);
        let mut mag = magnifier(host);
        mag.start().unwrap();
        assert!(mag.tick().is_err());

        mag.start().unwrap();
        assert_eq!(mag.state(), State::Running);
        assert_eq!(mag.tick().unwrap().len(), 2);

        let host = mag.host();
        assert_eq!(host.count(|c| *c == Call::Initialize), 2);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
    }

    #[test]
    fn test_run_stops_when_host_closes() {
        let mut host = FakeHost::new(SCREEN, Point::new(500, 500));
        host.dispatches_left = 3;
        let mut mag = magnifier(host);
        let running = AtomicBool::new(true);

        mag.run(&running, Duration::from_millis(1)).unwrap();

        assert_eq!(mag.state(), State::Idle);
        let host = mag.host();
        assert!(host.count(|c| matches!(c, Call::SetSource(..))) >= 2);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
    }

    #[test]
    fn test_run_exits_when_flag_cleared() {
        let mut mag = magnifier(FakeHost::new(SCREEN, Point::new(500, 500)));
        let running = AtomicBool::new(false);

        mag.run(&running, Duration::from_millis(10)).unwrap();

        let host = mag.host();
        assert_eq!(host.count(|c| matches!(c, Call::SetSource(..))), 0);
        assert_eq!(host.count(|c| *c == Call::Initialize), 1);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
    }

    #[test]
    fn test_run_returns_sample_rejection() {
        let mut host = FakeHost::new(SCREEN, Point::new(500, 500));
        host.reject_source_at = Some(0);
        let mut mag = magnifier(host);
        let running = AtomicBool::new(true);

        let err = mag.run(&running, Duration::from_millis(1)).unwrap_err();
        assert!(err.downcast_ref::<MagnifierError>().is_some());
        assert_eq!(mag.host().count(|c| *c == Call::Uninitialize), 1);
    }
}
