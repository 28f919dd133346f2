//! Timer device
//!
//! Exposes the interrupt controller's periodic timer as a device. Reading the
//! device waits for the next tick and returns the number of ticks seen so far.
//!
//! Waits are tracked per requester. A requester with two reads outstanding
//! has them served one after the other: the second starts waiting when the
//! first completes, so it completes one tick later.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use int_controller::{ControllerError, IntController, ReferenceTimer};

use crate::device::{Device, DeviceState};
use crate::request::{Operation, ProcessId, Request};
use crate::{DeviceError, Vector};

pub struct TimerDevice<C, T> {
    controller: Rc<RefCell<C>>,
    reference: T,
    vector: Vector,
    ticks: u64,
    state: DeviceState,
    /// Tick count each waiting requester first observed
    waiters: Vec<(ProcessId, u64)>,
}

impl<C: IntController, T: ReferenceTimer> TimerDevice<C, T> {
    pub fn new(controller: Rc<RefCell<C>>, reference: T) -> Self {
        let vector = controller.borrow().timer_interrupt();
        Self {
            controller,
            reference,
            vector,
            ticks: 0,
            state: DeviceState::Uninitialized,
            waiters: Vec::new(),
        }
    }

    /// Vector the timer interrupts on
    pub fn vector(&self) -> Vector {
        self.vector
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Calibrated frequency, `None` until initialized or while the
    /// controller is borrowed elsewhere
    pub fn frequency(&self) -> Option<u64> {
        self.controller
            .try_borrow()
            .ok()
            .and_then(|controller| controller.timer_frequency())
    }

    /// Complete the read once a tick has passed since it was first seen
    fn wait_tick(&mut self, requester: ProcessId) -> Result<usize, DeviceError> {
        match self.waiters.iter().position(|(id, _)| *id == requester) {
            Some(index) if self.waiters[index].1 < self.ticks => {
                self.waiters.swap_remove(index);
                Ok(usize::try_from(self.ticks).unwrap_or(usize::MAX))
            }
            Some(_) => Err(DeviceError::RetryAgain),
            None => {
                self.waiters.push((requester, self.ticks));
                Err(DeviceError::RetryAgain)
            }
        }
    }
}

impl<C: IntController, T: ReferenceTimer> Device for TimerDevice<C, T> {
    fn identifier(&self) -> &str {
        "timer"
    }

    fn initialize(&mut self) -> Result<(), DeviceError> {
        let result = match self.controller.try_borrow_mut() {
            Ok(mut controller) => controller.start_timer(&mut self.reference),
            Err(_) => {
                self.state = DeviceState::Failed;
                return Err(DeviceError::IoError);
            }
        };

        match result {
            Ok(()) => {
                self.state = DeviceState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = DeviceState::Failed;
                log::error!("Timer start failed: {}", err);
                match err {
                    ControllerError::Calibration(_) => Err(DeviceError::Calibration),
                    _ => Err(DeviceError::IoError),
                }
            }
        }
    }

    fn interrupt(&mut self, vector: Vector) {
        if vector == self.vector {
            self.ticks += 1;
        }
    }

    fn process(&mut self, request: &Request) -> Result<usize, DeviceError> {
        if self.state != DeviceState::Ready {
            return Err(DeviceError::IoError);
        }
        match request.operation {
            Operation::Read { .. } => self.wait_tick(request.requester),
            Operation::Write { .. } => Err(DeviceError::NotSupported),
        }
    }
}
