//! # Sensor Device Trait & Failover Selection
//!
//! This module defines the capability interface every sensor source
//! implements, and the per-category selector that keeps exactly one source
//! active out of an ordered list of redundant candidates.
//!
//! ## Selection Rule
//!
//! ```text
//!  candidates (priority order)      available?
//!  ┌───────────────────────────┐
//!  │ [0] serial amplifier      │    false
//!  │ [1] serial IMU board      │    true   ◄── first available wins
//!  │ [2] platform sensors      │    true
//!  └───────────────────────────┘
//! ```
//!
//! On a change the previous device is closed before the new one is opened.
//! If opening fails the previous device is reopened when it is still
//! available, so a category is never emptied in exchange for nothing.
//!
//! A device may close itself (unplugged port, fatal read error). The
//! selector then forgets it, the category reads as absent, and the next
//! check reopens whichever candidate is available, the same one included.

use heapless::Vec;

/// Errors building a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SelectionError {
    /// More candidates than the selector can hold
    TooManyCandidates,
}

/// A polled sensor source
///
/// `update` pumps pending I/O; `current_value` returns the most recently
/// decoded sample, or a zeroed sample if none arrived yet.
pub trait SensorDevice {
    /// Sample type produced by this category
    type Sample: Copy + Default;

    /// Short label for logs and statistics
    fn name(&self) -> &str;

    /// Result of the last availability probe
    fn available(&self) -> bool;

    /// Acquire resources; `false` leaves the device closed
    fn open(&mut self) -> bool;

    /// Whether the device currently holds its resources
    fn is_open(&self) -> bool;

    /// Pump pending I/O and parsing
    fn update(&mut self);

    fn current_value(&self) -> Self::Sample;

    /// Release resources; calling it on a closed device is a no-op
    fn close(&mut self);

    /// Refresh the probe behind `available`
    fn update_device_status(&mut self);
}

#[cfg(feature = "std")]
impl<D: SensorDevice + ?Sized> SensorDevice for std::boxed::Box<D> {
    type Sample = D::Sample;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn available(&self) -> bool {
        (**self).available()
    }

    fn open(&mut self) -> bool {
        (**self).open()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn update(&mut self) {
        (**self).update()
    }

    fn current_value(&self) -> Self::Sample {
        (**self).current_value()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn update_device_status(&mut self) {
        (**self).update_device_status()
    }
}

/// What a status check changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Selection {
    /// The preferred candidate is already active (or nothing is available
    /// and nothing was active)
    Unchanged,
    /// Switched to a new candidate
    Switched { from: Option<usize>, to: usize },
    /// The preferred candidate failed to open
    OpenFailed { attempted: usize, retained: Option<usize> },
    /// No candidate is available; the active device is kept
    NoneAvailable { retained: usize },
    /// The active device closed itself and nothing replaced it
    Lost { index: usize },
}

/// Ordered candidate list with one active entry
pub struct Failover<D, const N: usize> {
    candidates: Vec<D, N>,
    active: Option<usize>,
}

impl<D: SensorDevice, const N: usize> Failover<D, N> {
    /// Build a selector; earlier candidates are preferred
    pub fn new<I>(candidates: I) -> Result<Self, SelectionError>
    where
        I: IntoIterator<Item = D>,
    {
        let mut list = Vec::new();
        for candidate in candidates {
            list.push(candidate)
                .map_err(|_| SelectionError::TooManyCandidates)?;
        }
        Ok(Self {
            candidates: list,
            active: None,
        })
    }

    #[inline]
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&D> {
        self.active.map(|index| &self.candidates[index])
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active().map(|device| device.name())
    }

    pub fn candidates(&self) -> &[D] {
        &self.candidates
    }

    pub fn candidates_mut(&mut self) -> &mut [D] {
        &mut self.candidates
    }

    /// Probe every candidate, then apply the selection rule
    pub fn refresh(&mut self) -> Selection {
        for candidate in self.candidates.iter_mut() {
            candidate.update_device_status();
        }
        self.reselect()
    }

    /// Apply the selection rule to the last probe results
    pub fn reselect(&mut self) -> Selection {
        let lost = self.forget_closed();
        let preferred = self.candidates.iter().position(|device| device.available());

        match (preferred, self.active) {
            (Some(to), Some(from)) if to == from => Selection::Unchanged,
            (None, None) => match lost {
                Some(index) => Selection::Lost { index },
                None => Selection::Unchanged,
            },
            (None, Some(retained)) => Selection::NoneAvailable { retained },
            (Some(to), from) => {
                if let Some(previous) = from {
                    self.candidates[previous].close();
                }

                if self.candidates[to].open() {
                    self.active = Some(to);
                    return Selection::Switched { from, to };
                }

                let retained = from.filter(|previous| {
                    let device = &mut self.candidates[*previous];
                    device.available() && device.open()
                });
                self.active = retained;
                Selection::OpenFailed { attempted: to, retained }
            }
        }
    }

    /// Drop the active entry if its device is no longer open
    fn forget_closed(&mut self) -> Option<usize> {
        let index = self.active?;
        if self.candidates[index].is_open() {
            return None;
        }
        self.active = None;
        Some(index)
    }

    /// Pump the active device and return its current sample
    ///
    /// `None` when no device is active or the active one closed itself
    /// while updating.
    pub fn poll(&mut self) -> Option<D::Sample> {
        let device = &mut self.candidates[self.active?];
        device.update();
        device.is_open().then(|| device.current_value())
    }

    /// Close the active device and forget it
    pub fn close_active(&mut self) {
        if let Some(index) = self.active.take() {
            self.candidates[index].close();
        }
    }
}
