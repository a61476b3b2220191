//! Recording host for driver tests.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Result};

use super::{Host, SurfaceId};
use crate::error::MagnifierError;
use crate::utils::{Point, Rect};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Initialize,
    Uninitialize,
    CreateSurface(usize),
    DestroySurface(SurfaceId),
    SetTransform(SurfaceId, f32),
    SetSource(SurfaceId, Rect),
    Notify(String),
}

#[derive(Default)]
pub struct FakeHost {
    pub calls: Rc<RefCell<Vec<Call>>>,
    pub cursor: Point,
    pub screen: Rect,
    pub fail_initialize: bool,
    pub fail_create_at: Option<usize>,
    pub fail_transform: bool,
    /// Reject the n-th `set_source` call (0-based).
    pub reject_source_at: Option<usize>,
    pub dispatches_left: usize,
    next_surface: usize,
    sources_seen: usize,
}

impl FakeHost {
    pub fn new(screen: Rect, cursor: Point) -> Self {
        Self {
            screen,
            cursor,
            dispatches_left: usize::MAX,
            ..Self::default()
        }
    }

    pub fn log(&self) -> Rc<RefCell<Vec<Call>>> {
        self.calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl Host for FakeHost {
    fn initialize(&mut self) -> Result<()> {
        self.record(Call::Initialize);
        if self.fail_initialize {
            bail!("magnification service unavailable");
        }
        Ok(())
    }

    fn uninitialize(&mut self) {
        self.record(Call::Uninitialize);
    }

    fn create_surface(&mut self, index: usize, _zoom_factor: f32) -> Result<SurfaceId> {
        self.record(Call::CreateSurface(index));
        if self.fail_create_at == Some(index) {
            bail!("no room for surface {}", index);
        }
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.record(Call::DestroySurface(surface));
    }

    fn set_transform(&mut self, surface: SurfaceId, zoom_factor: f32) -> Result<()> {
        self.record(Call::SetTransform(surface, zoom_factor));
        if self.fail_transform {
            bail!("transform refused");
        }
        Ok(())
    }

    fn set_source(&mut self, surface: SurfaceId, rect: Rect) -> Result<()> {
        self.record(Call::SetSource(surface, rect));
        let n = self.sources_seen;
        self.sources_seen += 1;
        if self.reject_source_at == Some(n) {
            bail!("source rejected");
        }
        Ok(())
    }

    fn cursor_position(&self) -> Point {
        self.cursor
    }

    fn display_bounds_containing(&self, _point: Point) -> Rect {
        self.screen
    }

    fn dispatch(&mut self, _timeout: Duration) -> Result<bool> {
        if self.dispatches_left == 0 {
            return Ok(false);
        }
        self.dispatches_left -= 1;
        Ok(true)
    }

    fn notify(&mut self, error: &MagnifierError) {
        self.record(Call::Notify(error.to_string()));
    }
}
