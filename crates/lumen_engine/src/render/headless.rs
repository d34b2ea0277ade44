//! Headless reference device.
//!
//! Executes submissions on its own worker thread and advances a fence
//! counter guarded by a mutex and condition variable, so the frame pipeline
//! runs against real cross-thread completion without a GPU or a window.
//! Every externally visible step is appended to an event log that tests
//! inspect for ordering.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::commands::{GpuCommand, TargetState};
use super::device::{
    BufferHandle, BufferUsage, DeviceError, DeviceResult, DeviceStatus, Extent, FenceValue, GpuDevice,
    ProgramDesc, ProgramHandle, Submission, TextureHandle,
};
use crate::assets::ImageData;

/// Something the headless device observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Target handed out for the next frame
    TargetAcquired(u32),
    /// Command list queued
    Submitted {
        /// Frame slot
        slot: usize,
        /// Target written
        target: u32,
        /// Fence value to signal
        signal: FenceValue,
        /// Draw calls in the list
        draws: usize,
    },
    /// Fence reached this value
    Completed(FenceValue),
    /// CPU blocked waiting for this value
    Waited(FenceValue),
    /// Target shown
    Presented(u32),
    /// Surface resources dropped
    TargetsReleased {
        /// Fence value completed at release time
        completed: FenceValue,
        /// Highest value submitted at release time
        highest_submitted: FenceValue,
    },
    /// Surface resources rebuilt
    TargetsRecreated(Extent),
}

#[derive(Debug)]
struct State {
    status: DeviceStatus,
    completed: FenceValue,
    highest_submitted: FenceValue,
    paused: bool,
    delay: Duration,
    extent: Extent,
    target_count: usize,
    next_target: u32,
    targets_live: bool,
    events: Vec<DeviceEvent>,
    last_submission: Option<Submission>,
    protocol_violations: usize,
    next_handle: u64,
    programs: HashMap<u64, String>,
    buffers: HashMap<u64, (BufferUsage, Vec<u8>)>,
    textures: HashMap<u64, (u32, u32)>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.signal.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Device that runs command lists on a background thread
#[derive(Debug)]
pub struct HeadlessDevice {
    shared: Arc<Shared>,
    queue: Mutex<Option<Sender<Submission>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessDevice {
    /// Device with a surface of `extent` and `target_count` rotating targets
    pub fn new(extent: Extent, target_count: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                status: DeviceStatus::Ready,
                completed: 0,
                highest_submitted: 0,
                paused: false,
                delay: Duration::ZERO,
                extent,
                target_count,
                next_target: 0,
                targets_live: true,
                events: Vec::new(),
                last_submission: None,
                protocol_violations: 0,
                next_handle: 1,
                programs: HashMap::new(),
                buffers: HashMap::new(),
                textures: HashMap::new(),
            }),
            signal: Condvar::new(),
        });

        let (sender, receiver) = mpsc::channel();
        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("headless-gpu".to_string())
                .spawn(move || execute_submissions(&shared, &receiver))
                .map_err(|e| log::error!("Failed to start headless queue thread: {}", e))
                .ok()
        };

        Self {
            shared,
            queue: Mutex::new(Some(sender)),
            worker: Mutex::new(worker),
        }
    }

    /// Stall the queue; submissions stay pending until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.shared.lock().paused = true;
    }

    /// Let the queue run again
    pub fn resume(&self) {
        self.shared.lock().paused = false;
        self.shared.signal.notify_all();
    }

    /// Make every submission take at least `delay`
    pub fn set_execution_delay(&self, delay: Duration) {
        self.shared.lock().delay = delay;
    }

    /// Report the device as removed; blocked waiters wake with an error
    pub fn simulate_device_loss(&self, reason: &str) {
        self.shared.lock().status = DeviceStatus::Lost(reason.to_string());
        self.shared.signal.notify_all();
    }

    /// Everything observed so far
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.shared.lock().events.clone()
    }

    /// Most recently executed submission
    pub fn last_submission(&self) -> Option<Submission> {
        self.shared.lock().last_submission.clone()
    }

    /// Command lists that did not open with a writable transition or close
    /// with a presentable one
    pub fn protocol_violations(&self) -> usize {
        self.shared.lock().protocol_violations
    }

    /// Bytes currently stored in `buffer`
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.shared.lock().buffers.get(&buffer.0).map(|(_, bytes)| bytes.clone())
    }

    /// Number of live programs, buffers and textures
    pub fn live_resources(&self) -> (usize, usize, usize) {
        let state = self.shared.lock();
        (state.programs.len(), state.buffers.len(), state.textures.len())
    }

    fn allocate_handle(state: &mut State) -> u64 {
        let id = state.next_handle;
        state.next_handle += 1;
        id
    }

    fn check_ready(state: &State) -> DeviceResult<()> {
        match &state.status {
            DeviceStatus::Ready => Ok(()),
            DeviceStatus::Lost(reason) => Err(DeviceError::Lost(reason.clone())),
        }
    }
}

fn follows_target_protocol(commands: &[GpuCommand]) -> bool {
    let opens = matches!(
        commands.first(),
        Some(GpuCommand::TransitionTarget { from: TargetState::Presentable, to: TargetState::Writable, .. })
    );
    let closes = matches!(
        commands.last(),
        Some(GpuCommand::TransitionTarget { from: TargetState::Writable, to: TargetState::Presentable, .. })
    );
    opens && closes
}

fn execute_submissions(shared: &Shared, receiver: &Receiver<Submission>) {
    while let Ok(submission) = receiver.recv() {
        let delay = {
            let mut state = shared.lock();
            while state.paused && state.status == DeviceStatus::Ready {
                state = shared.wait(state);
            }
            state.delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = shared.lock();
        if state.status != DeviceStatus::Ready {
            // A lost device never completes outstanding work
            continue;
        }
        if !follows_target_protocol(&submission.commands) {
            log::warn!("Submission for fence {} broke the target transition protocol", submission.signal);
            state.protocol_violations += 1;
        }
        state.completed = state.completed.max(submission.signal);
        state.events.push(DeviceEvent::Completed(submission.signal));
        state.last_submission = Some(submission);
        drop(state);
        shared.signal.notify_all();
    }
}

impl GpuDevice for HeadlessDevice {
    fn status(&self) -> DeviceStatus {
        self.shared.lock().status.clone()
    }

    fn surface_extent(&self) -> Extent {
        self.shared.lock().extent
    }

    fn target_count(&self) -> usize {
        self.shared.lock().target_count
    }

    fn acquire_target(&self) -> DeviceResult<u32> {
        let mut state = self.shared.lock();
        Self::check_ready(&state)?;
        if !state.targets_live || state.target_count == 0 {
            return Err(DeviceError::api("acquire_target", "surface targets were released"));
        }
        let target = state.next_target;
        state.next_target = (target + 1) % state.target_count as u32;
        state.events.push(DeviceEvent::TargetAcquired(target));
        Ok(target)
    }

    fn submit(&self, submission: Submission) -> DeviceResult<()> {
        {
            let mut state = self.shared.lock();
            Self::check_ready(&state)?;
            let draws = submission
                .commands
                .iter()
                .filter(|c| matches!(c, GpuCommand::DrawIndexed { .. }))
                .count();
            state.highest_submitted = state.highest_submitted.max(submission.signal);
            state.events.push(DeviceEvent::Submitted {
                slot: submission.slot,
                target: submission.target,
                signal: submission.signal,
                draws,
            });
        }

        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .as_ref()
            .ok_or_else(|| DeviceError::api("submit", "queue closed"))?
            .send(submission)
            .map_err(|e| DeviceError::api("submit", e))
    }

    fn completed_value(&self) -> FenceValue {
        self.shared.lock().completed
    }

    fn wait_for_value(&self, value: FenceValue) -> DeviceResult<()> {
        let mut state = self.shared.lock();
        state.events.push(DeviceEvent::Waited(value));
        while state.completed < value {
            Self::check_ready(&state)?;
            state = self.shared.wait(state);
        }
        Ok(())
    }

    fn present(&self, target: u32) -> DeviceResult<()> {
        let mut state = self.shared.lock();
        Self::check_ready(&state)?;
        if !state.targets_live {
            return Err(DeviceError::api("present", "surface targets were released"));
        }
        state.events.push(DeviceEvent::Presented(target));
        Ok(())
    }

    fn release_targets(&self) -> DeviceResult<()> {
        let mut state = self.shared.lock();
        let event = DeviceEvent::TargetsReleased {
            completed: state.completed,
            highest_submitted: state.highest_submitted,
        };
        if state.completed < state.highest_submitted {
            log::error!("Surface released with fence {} still pending", state.highest_submitted);
        }
        state.targets_live = false;
        state.events.push(event);
        Ok(())
    }

    fn recreate_targets(&self, extent: Extent) -> DeviceResult<usize> {
        let mut state = self.shared.lock();
        Self::check_ready(&state)?;
        state.extent = extent;
        state.targets_live = true;
        state.next_target = 0;
        state.events.push(DeviceEvent::TargetsRecreated(extent));
        Ok(state.target_count)
    }

    fn create_program(&self, desc: &ProgramDesc<'_>) -> DeviceResult<ProgramHandle> {
        if let Some((stage, _)) = desc.stages.iter().find(|(_, words)| words.is_empty()) {
            return Err(DeviceError::api("create_program", format!("{stage:?} stage has no bytecode")));
        }
        let mut state = self.shared.lock();
        Self::check_ready(&state)?;
        let id = Self::allocate_handle(&mut state);
        state.programs.insert(id, desc.name.to_string());
        Ok(ProgramHandle(id))
    }

    fn create_buffer(&self, usage: BufferUsage, bytes: &[u8]) -> DeviceResult<BufferHandle> {
        let mut state = self.shared.lock();
        Self::check_ready(&state)?;
        let id = Self::allocate_handle(&mut state);
        state.buffers.insert(id, (usage, bytes.to_vec()));
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, bytes: &[u8]) -> DeviceResult<()> {
        let mut state = self.shared.lock();
        let (_, contents) = state.buffers.get_mut(&buffer.0).ok_or(DeviceError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        if bytes.len() > contents.len() {
            return Err(DeviceError::api(
                "write_buffer",
                format!("{} bytes into a {} byte buffer", bytes.len(), contents.len()),
            ));
        }
        contents[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn create_texture(&self, image: &ImageData) -> DeviceResult<TextureHandle> {
        let expected = image.width as usize * image.height as usize * 4;
        if image.data.len() != expected {
            return Err(DeviceError::api(
                "create_texture",
                format!("{} bytes for a {}x{} image", image.data.len(), image.width, image.height),
            ));
        }
        let mut state = self.shared.lock();
        Self::check_ready(&state)?;
        let id = Self::allocate_handle(&mut state);
        state.textures.insert(id, (image.width, image.height));
        Ok(TextureHandle(id))
    }

    fn destroy_program(&self, program: ProgramHandle) {
        self.shared.lock().programs.remove(&program.0);
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.shared.lock().buffers.remove(&buffer.0);
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.shared.lock().textures.remove(&texture.0);
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        let mut state = self.shared.lock();
        let highest = state.highest_submitted;
        while state.completed < highest {
            Self::check_ready(&state)?;
            state = self.shared.wait(state);
        }
        Ok(())
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.resume();
        if let Some(worker) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if worker.join().is_err() {
                log::error!("Headless queue thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_rotate_and_reset_on_recreate() {
        let device = HeadlessDevice::new(Extent::new(8, 8), 2);
        assert_eq!(device.acquire_target().unwrap(), 0);
        assert_eq!(device.acquire_target().unwrap(), 1);
        assert_eq!(device.acquire_target().unwrap(), 0);

        device.release_targets().unwrap();
        assert!(device.acquire_target().is_err());
        assert_eq!(device.recreate_targets(Extent::new(16, 16)).unwrap(), 2);
        assert_eq!(device.acquire_target().unwrap(), 0);
        assert_eq!(device.surface_extent(), Extent::new(16, 16));
    }

    #[test]
    fn submissions_complete_on_the_worker_thread() {
        let device = HeadlessDevice::new(Extent::new(8, 8), 2);
        for signal in 1..=3 {
            device
                .submit(Submission {
                    slot: 0,
                    target: 0,
                    commands: Vec::new(),
                    signal,
                })
                .unwrap();
        }
        device.wait_for_value(3).unwrap();
        assert_eq!(device.completed_value(), 3);
        // Empty lists skip the transition protocol
        assert_eq!(device.protocol_violations(), 3);
    }

    #[test]
    fn lost_device_wakes_waiters_with_an_error() {
        let device = Arc::new(HeadlessDevice::new(Extent::new(8, 8), 2));
        device.pause();
        device
            .submit(Submission {
                slot: 0,
                target: 0,
                commands: Vec::new(),
                signal: 1,
            })
            .unwrap();

        let waiter = {
            let device = device.clone();
            std::thread::spawn(move || device.wait_for_value(1))
        };
        std::thread::sleep(Duration::from_millis(20));
        device.simulate_device_loss("hung");
        assert_eq!(waiter.join().unwrap(), Err(DeviceError::Lost("hung".to_string())));
    }

    #[test]
    fn write_buffer_respects_size() {
        let device = HeadlessDevice::new(Extent::new(8, 8), 2);
        let buffer = device.create_buffer(BufferUsage::Constant, &[0; 8]).unwrap();
        device.write_buffer(buffer, &[1, 2]).unwrap();
        assert_eq!(device.buffer_contents(buffer).unwrap()[..3], [1, 2, 0]);
        assert!(device.write_buffer(buffer, &[0; 9]).is_err());
        device.destroy_buffer(buffer);
        assert_eq!(device.live_resources(), (0, 0, 0));
    }
}
