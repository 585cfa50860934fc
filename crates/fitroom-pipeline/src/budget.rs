//! Process-wide device memory budget.
//!
//! The accelerator is sized for exactly one model group at a time. The
//! device allocator's cache is shared, process-wide state, so handing
//! the device from one group to the next is an explicit protocol rather
//! than something left to collection timing:
//!
//! 1. [`DeviceBudget::acquire`] opens a new memory epoch. It refuses if
//!    any other group is still resident or if the group does not fit.
//! 2. The returned [`ModelHandle`] owns the loaded model.
//! 3. [`ModelHandle::release`] drops the model, forces the allocator to
//!    collect and reset its cache, and closes the epoch before
//!    returning. The [`Released`] receipt it hands back is the only
//!    proof a caller can show that the device is free again.
//!
//! A handle that is dropped without an explicit release (early return,
//! unwinding) runs the same reclamation, so no path leaves a
//! half-released group behind.
//!
//! # Invariants
//!
//! - At most one [`Residency`] exists at any time.
//! - Epoch numbers strictly increase; a closed epoch is never reopened.
//! - `high_water_bytes <= capacity_bytes`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, ModelGroup};
use crate::types::FitroomError;

/// Hooks into the device allocator's global state.
pub trait DeviceAllocator: Send + Sync {
    /// Collect unreachable device allocations.
    fn collect(&self);

    /// Return cached blocks to the device and reset peak statistics.
    fn reset_cache(&self);
}

/// Allocator for host-only runs where there is nothing to reclaim.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAllocator;

impl DeviceAllocator for HostAllocator {
    fn collect(&self) {}

    fn reset_cache(&self) {}
}

/// The group currently occupying the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Residency {
    /// Resident group.
    pub group: ModelGroup,
    /// Bytes reserved for it.
    pub bytes: u64,
    /// Epoch it was acquired in (1-based).
    pub epoch: u64,
}

/// Point-in-time view of the budget, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// Total device bytes available to model groups.
    pub capacity_bytes: u64,
    /// The group on the device right now, if any.
    pub resident: Option<Residency>,
    /// Number of epochs opened so far.
    pub epochs_opened: u64,
    /// Number of completed reclamations.
    pub releases: u64,
    /// Largest single reservation ever granted.
    pub high_water_bytes: u64,
}

#[derive(Debug, Default)]
struct BudgetState {
    resident: Option<Residency>,
    epochs_opened: u64,
    releases: u64,
    high_water_bytes: u64,
}

/// Accelerator memory shared by every model group in the process.
pub struct DeviceBudget {
    capacity_bytes: u64,
    allocator: Arc<dyn DeviceAllocator>,
    state: Mutex<BudgetState>,
}

impl fmt::Debug for DeviceBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBudget")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl DeviceBudget {
    /// Create a budget of `capacity_bytes` backed by `allocator`.
    #[must_use]
    pub fn new(capacity_bytes: u64, allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            capacity_bytes,
            allocator,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Total device bytes available to model groups.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity_bytes
    }

    /// The group on the device right now, if any.
    #[must_use]
    pub fn resident(&self) -> Option<Residency> {
        self.lock().resident
    }

    /// Point-in-time view of the budget.
    #[must_use]
    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.lock();
        BudgetSnapshot {
            capacity_bytes: self.capacity_bytes,
            resident: state.resident,
            epochs_opened: state.epochs_opened,
            releases: state.releases,
            high_water_bytes: state.high_water_bytes,
        }
    }

    /// Open a new epoch for `group` and load it with `load`.
    ///
    /// If `load` fails, the reservation is reclaimed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Resource`] if another group is resident,
    /// if `bytes` exceeds the capacity, or if `load` fails.
    pub fn acquire<T, F>(
        self: &Arc<Self>,
        group: ModelGroup,
        bytes: u64,
        load: F,
    ) -> Result<ModelHandle<T>, FitroomError>
    where
        F: FnOnce() -> Result<T, EngineError>,
    {
        let reservation = self.reserve(group, bytes)?;
        match load() {
            Ok(model) => Ok(ModelHandle { model, reservation }),
            Err(e) => {
                let released = reservation.release();
                tracing::warn!(%group, epoch = released.epoch(), error = %e, "model load failed");
                Err(FitroomError::Resource(format!("loading {group} failed: {e}")))
            }
        }
    }

    fn reserve(self: &Arc<Self>, group: ModelGroup, bytes: u64) -> Result<Reservation, FitroomError> {
        let mut state = self.lock();
        if let Some(current) = state.resident {
            return Err(FitroomError::Resource(format!(
                "{group} requested while {} from epoch {} is still resident",
                current.group, current.epoch
            )));
        }
        if bytes > self.capacity_bytes {
            return Err(FitroomError::Resource(format!(
                "{group} needs {bytes} bytes, device budget is {} bytes",
                self.capacity_bytes
            )));
        }

        state.epochs_opened += 1;
        let residency = Residency {
            group,
            bytes,
            epoch: state.epochs_opened,
        };
        state.resident = Some(residency);
        state.high_water_bytes = state.high_water_bytes.max(bytes);
        tracing::debug!(%group, bytes, epoch = residency.epoch, "memory epoch opened");

        Ok(Reservation {
            budget: Arc::clone(self),
            residency,
            released: false,
        })
    }

    fn reclaim(&self, residency: Residency) {
        let mut state = self.lock();
        self.allocator.collect();
        self.allocator.reset_cache();
        if state.resident == Some(residency) {
            state.resident = None;
        }
        state.releases += 1;
        tracing::debug!(
            group = %residency.group,
            epoch = residency.epoch,
            "memory epoch closed"
        );
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that a group's epoch was closed and its memory reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a release receipt is the guard for the next stage"]
pub struct Released {
    group: ModelGroup,
    epoch: u64,
}

impl Released {
    /// The group that was released.
    #[must_use]
    pub const fn group(&self) -> ModelGroup {
        self.group
    }

    /// The epoch that was closed.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct Reservation {
    budget: Arc<DeviceBudget>,
    residency: Residency,
    released: bool,
}

impl Reservation {
    fn release(mut self) -> Released {
        self.released = true;
        self.budget.reclaim(self.residency);
        Released {
            group: self.residency.group,
            epoch: self.residency.epoch,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.budget.reclaim(self.residency);
        }
    }
}

/// A model group resident on the device.
///
/// Fields drop in declaration order, so the model is always gone before
/// its reservation is reclaimed.
pub struct ModelHandle<T> {
    model: T,
    reservation: Reservation,
}

impl<T> fmt::Debug for ModelHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("residency", &self.reservation.residency)
            .finish_non_exhaustive()
    }
}

impl<T> ModelHandle<T> {
    /// The resident group.
    #[must_use]
    pub const fn group(&self) -> ModelGroup {
        self.reservation.residency.group
    }

    /// The epoch this handle belongs to.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.reservation.residency.epoch
    }

    /// Mutable access to the loaded model.
    pub const fn model_mut(&mut self) -> &mut T {
        &mut self.model
    }

    /// Drop the model and reclaim its memory synchronously.
    pub fn release(self) -> Released {
        let Self { model, reservation } = self;
        drop(model);
        reservation.release()
    }
}
