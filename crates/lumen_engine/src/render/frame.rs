//! Frame pipeline: rotating frame slots guarded by a monotonic fence.
//!
//! Each slot owns a command list, the presentation target it writes and the
//! fence value of its last submission. A slot is only handed back for
//! recording once the device reports that value as completed, so the CPU
//! never rewrites work the GPU is still reading.
//!
//! Per slot the state only moves forward:
//! `Idle -> Recording -> Submitted -> (fence signaled) -> Idle`.

use std::sync::Arc;

use thiserror::Error;

use super::commands::{CommandRecorder, GpuCommand, TargetState};
use super::device::{DeviceError, DeviceStatus, Extent, FenceValue, GpuDevice, Submission};
use crate::core::config::RendererConfig;

/// Index of a frame slot
pub type SlotIndex = usize;

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Free for recording
    Idle,
    /// Commands are being recorded
    Recording,
    /// Submitted, waiting for the fence
    Submitted,
}

/// Frame pipeline errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Device reported reset or removal
    #[error("graphics device lost: {0}")]
    DeviceLost(String),

    /// Other device failure
    #[error(transparent)]
    Device(DeviceError),

    /// Slot asked to move to a state it cannot reach from where it is
    #[error("slot {slot} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        /// Slot index
        slot: SlotIndex,
        /// Current state
        from: SlotState,
        /// Requested state
        to: SlotState,
    },

    /// Slot's previous submission has not finished
    #[error("slot {slot} still in flight: waiting for {pending}, device at {completed}")]
    SlotInFlight {
        /// Slot index
        slot: SlotIndex,
        /// Fence value of the previous submission
        pending: FenceValue,
        /// Device completed value
        completed: FenceValue,
    },

    /// Slot index outside the pipeline
    #[error("no frame slot {0}")]
    UnknownSlot(SlotIndex),

    /// Operation on a slot that was not the one acquired
    #[error("slot {requested} was not acquired, current slot is {acquired:?}")]
    NotAcquired {
        /// Slot passed by the caller
        requested: SlotIndex,
        /// Slot actually acquired
        acquired: Option<SlotIndex>,
    },

    /// A fence wait asked for a lower value than a previous wait
    #[error("fence wait for {requested} after already waiting for {last}")]
    FenceRegression {
        /// Requested value
        requested: FenceValue,
        /// Previously waited value
        last: FenceValue,
    },

    /// A fence wait asked for a value nothing will ever signal
    #[error("fence value {requested} was never issued, last issued {issued}")]
    FenceNotIssued {
        /// Requested value
        requested: FenceValue,
        /// Highest issued value
        issued: FenceValue,
    },

    /// `present` without a submitted frame
    #[error("no submitted frame to present")]
    NothingToPresent,

    /// Device surface has no targets
    #[error("presentation surface has no targets")]
    NoTargets,

    /// Pipeline already cleaned up
    #[error("frame pipeline has been cleaned up")]
    CleanedUp,
}

impl From<DeviceError> for FrameError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Lost(reason) => Self::DeviceLost(reason),
            other => Self::Device(other),
        }
    }
}

impl FrameError {
    /// Device failures; everything else is a misuse of the pipeline
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceLost(_) | Self::Device(_))
    }
}

/// Frame result alias
pub type FrameResult<T> = Result<T, FrameError>;

/// One rotating set of recording resources
#[derive(Debug)]
pub struct FrameSlot {
    index: SlotIndex,
    state: SlotState,
    commands: Vec<GpuCommand>,
    target: Option<u32>,
    fence_value: FenceValue,
}

impl FrameSlot {
    fn new(index: SlotIndex) -> Self {
        Self {
            index,
            state: SlotState::Idle,
            commands: Vec::new(),
            target: None,
            fence_value: 0,
        }
    }

    /// Slot index
    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// Current state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Fence value of the last submission from this slot
    pub fn fence_value(&self) -> FenceValue {
        self.fence_value
    }

    /// Target assigned at the last acquire
    pub fn target(&self) -> Option<u32> {
        self.target
    }
}

/// Coordinates CPU recording with GPU execution across frame slots.
pub struct FramePipeline {
    device: Arc<dyn GpuDevice>,
    slots: Vec<FrameSlot>,
    extent: Extent,
    clear_color: [f32; 4],
    clear_depth: f32,
    last_issued: FenceValue,
    last_waited: FenceValue,
    acquired: Option<SlotIndex>,
    pending_present: Option<SlotIndex>,
    cleaned_up: bool,
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("slots", &self.slots)
            .field("extent", &self.extent)
            .field("last_issued", &self.last_issued)
            .field("last_waited", &self.last_waited)
            .finish_non_exhaustive()
    }
}

impl FramePipeline {
    /// Allocate one slot per presentation target of `device`
    pub fn new(device: Arc<dyn GpuDevice>, config: &RendererConfig) -> FrameResult<Self> {
        let count = device.target_count();
        if count == 0 {
            return Err(FrameError::NoTargets);
        }
        if count != config.frames_in_flight {
            log::warn!(
                "Surface provides {} targets, {} frames in flight were requested",
                count,
                config.frames_in_flight
            );
        }

        let extent = device.surface_extent();
        log::info!("Frame pipeline created with {} slots at {}x{}", count, extent.width, extent.height);

        Ok(Self {
            device,
            slots: (0..count).map(FrameSlot::new).collect(),
            extent,
            clear_color: config.clear_color,
            clear_depth: config.clear_depth,
            last_issued: 0,
            last_waited: 0,
            acquired: None,
            pending_present: None,
            cleaned_up: false,
        })
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Inspect a slot
    pub fn slot(&self, index: SlotIndex) -> FrameResult<&FrameSlot> {
        self.slots.get(index).ok_or(FrameError::UnknownSlot(index))
    }

    /// Current surface size
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Highest fence value handed to the device
    pub fn last_issued(&self) -> FenceValue {
        self.last_issued
    }

    /// Highest fence value waited for
    pub fn last_waited(&self) -> FenceValue {
        self.last_waited
    }

    fn check_device(&self) -> FrameResult<()> {
        if self.cleaned_up {
            return Err(FrameError::CleanedUp);
        }
        match self.device.status() {
            DeviceStatus::Ready => Ok(()),
            DeviceStatus::Lost(reason) => Err(FrameError::DeviceLost(reason)),
        }
    }

    fn slot_mut(&mut self, index: SlotIndex) -> FrameResult<&mut FrameSlot> {
        self.slots.get_mut(index).ok_or(FrameError::UnknownSlot(index))
    }

    fn check_acquired(&self, index: SlotIndex) -> FrameResult<()> {
        if self.acquired == Some(index) {
            Ok(())
        } else {
            Err(FrameError::NotAcquired {
                requested: index,
                acquired: self.acquired,
            })
        }
    }

    /// Return every submitted slot whose fence has completed to `Idle`
    fn retire_completed(&mut self) {
        let completed = self.device.completed_value();
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted && slot.fence_value <= completed {
                slot.state = SlotState::Idle;
            }
        }
    }

    /// Select the slot for the next presentation target.
    ///
    /// Blocks until the slot's previous submission has completed, then
    /// resets its command list. Slot state is validated before a target is
    /// taken from the device. Once it is taken only device errors can fail
    /// the call; those are fatal and the target stays consumed.
    pub fn acquire_slot(&mut self) -> FrameResult<SlotIndex> {
        self.check_device()?;
        if let Some(current) = self.acquired {
            return Err(FrameError::InvalidTransition {
                slot: current,
                from: self.slots[current].state,
                to: SlotState::Recording,
            });
        }
        if let Some(busy) = self.slots.iter().find(|slot| slot.state == SlotState::Recording) {
            return Err(FrameError::InvalidTransition {
                slot: busy.index,
                from: SlotState::Recording,
                to: SlotState::Recording,
            });
        }

        let target = self.device.acquire_target()?;
        let index = target as usize % self.slots.len();

        // Submitted slots leave that state once the fence passes their value
        let pending = self.slots[index].fence_value;
        if self.device.completed_value() < pending {
            log::trace!("Slot {} waiting for fence {}", index, pending);
            self.device.wait_for_value(pending)?;
            self.last_waited = self.last_waited.max(pending);
        }
        self.retire_completed();

        let slot = &mut self.slots[index];
        debug_assert_eq!(slot.state, SlotState::Idle);
        slot.commands.clear();
        slot.target = Some(target);
        self.acquired = Some(index);

        log::trace!("Acquired slot {} for target {}", index, target);
        Ok(index)
    }

    /// Start recording into an acquired slot.
    ///
    /// Makes the target writable, sets viewport and scissor to the current
    /// surface size and clears color and depth.
    pub fn open_recording(&mut self, index: SlotIndex) -> FrameResult<()> {
        self.check_device()?;
        self.check_acquired(index)?;

        let completed = self.device.completed_value();
        let extent = self.device.surface_extent();
        let (clear_color, clear_depth) = (self.clear_color, self.clear_depth);

        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Idle {
            return Err(FrameError::InvalidTransition {
                slot: index,
                from: slot.state,
                to: SlotState::Recording,
            });
        }
        if completed < slot.fence_value {
            return Err(FrameError::SlotInFlight {
                slot: index,
                pending: slot.fence_value,
                completed,
            });
        }
        let target = slot.target.ok_or(FrameError::NoTargets)?;

        slot.state = SlotState::Recording;
        let mut recorder = CommandRecorder::new(&mut slot.commands);
        recorder.transition(target, TargetState::Presentable, TargetState::Writable);
        recorder.set_viewport_and_scissor(extent.width, extent.height);
        recorder.clear(clear_color, clear_depth);

        self.extent = extent;
        Ok(())
    }

    /// Recorder for a slot in `Recording`
    pub fn recorder(&mut self, index: SlotIndex) -> FrameResult<CommandRecorder<'_>> {
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Recording {
            return Err(FrameError::InvalidTransition {
                slot: index,
                from: slot.state,
                to: SlotState::Recording,
            });
        }
        Ok(CommandRecorder::new(&mut slot.commands))
    }

    /// Finish recording and submit, signaling the next fence value.
    pub fn close_and_submit(&mut self, index: SlotIndex) -> FrameResult<FenceValue> {
        self.check_device()?;
        self.check_acquired(index)?;

        let signal = self.last_issued + 1;
        let slot = self.slot_mut(index)?;
        if slot.state != SlotState::Recording {
            return Err(FrameError::InvalidTransition {
                slot: index,
                from: slot.state,
                to: SlotState::Submitted,
            });
        }
        let target = slot.target.ok_or(FrameError::NoTargets)?;

        CommandRecorder::new(&mut slot.commands).transition(
            target,
            TargetState::Writable,
            TargetState::Presentable,
        );
        let submission = Submission {
            slot: index,
            target,
            commands: std::mem::take(&mut slot.commands),
            signal,
        };

        self.device.submit(submission)?;

        let slot = &mut self.slots[index];
        slot.fence_value = signal;
        slot.state = SlotState::Submitted;
        self.last_issued = signal;
        self.acquired = None;
        self.pending_present = Some(index);

        log::trace!("Submitted slot {} with fence {}", index, signal);
        Ok(signal)
    }

    /// Present the last submitted slot, then wait for its fence.
    pub fn present(&mut self) -> FrameResult<()> {
        self.check_device()?;
        let index = self.pending_present.take().ok_or(FrameError::NothingToPresent)?;
        let slot = &self.slots[index];
        let target = slot.target.ok_or(FrameError::NoTargets)?;
        let fence_value = slot.fence_value;

        self.device.present(target)?;
        self.wait_for_fence(fence_value)
    }

    /// Block until the device fence reaches `target`.
    ///
    /// Values must be non-decreasing across calls.
    pub fn wait_for_fence(&mut self, target: FenceValue) -> FrameResult<()> {
        if target < self.last_waited {
            return Err(FrameError::FenceRegression {
                requested: target,
                last: self.last_waited,
            });
        }
        if target > self.last_issued {
            return Err(FrameError::FenceNotIssued {
                requested: target,
                issued: self.last_issued,
            });
        }

        if self.device.completed_value() < target {
            self.device.wait_for_value(target)?;
        }
        self.last_waited = target;
        self.retire_completed();
        Ok(())
    }

    /// Drain in-flight work, then rebuild every surface-backed resource.
    ///
    /// Returns `false` when the new size has zero area and nothing changed.
    pub fn resize(&mut self, extent: Extent) -> FrameResult<bool> {
        self.check_device()?;
        if extent.is_empty() {
            log::debug!("Ignoring resize to {}x{}", extent.width, extent.height);
            return Ok(false);
        }
        if let Some(index) = self.acquired {
            return Err(FrameError::InvalidTransition {
                slot: index,
                from: self.slots[index].state,
                to: SlotState::Idle,
            });
        }

        self.wait_for_fence(self.last_issued)?;
        self.device.release_targets()?;
        let count = self.device.recreate_targets(extent)?;
        if count != self.slots.len() {
            return Err(DeviceError::TargetCountChanged {
                expected: self.slots.len(),
                actual: count,
            }
            .into());
        }

        for slot in &mut self.slots {
            slot.target = None;
        }
        self.pending_present = None;
        self.extent = extent;

        log::info!("Resized presentation surface to {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Drain the queue and release the surface. Later calls do nothing.
    pub fn clean_up(&mut self) -> FrameResult<()> {
        if self.cleaned_up {
            return Ok(());
        }
        if self.device.status() == DeviceStatus::Ready {
            self.wait_for_fence(self.last_issued)?;
            self.device.release_targets()?;
        }
        self.acquired = None;
        self.pending_present = None;
        self.cleaned_up = true;
        log::info!("Frame pipeline cleaned up after {} frames", self.last_issued);
        Ok(())
    }
}
