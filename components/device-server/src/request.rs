//! Pending Requests - Deferred I/O retry
//!
//! A request is attempted as soon as it is submitted. If the device answers
//! [`DeviceError::RetryAgain`] the request is parked, and every later sweep
//! attempts it again until it completes with any other outcome.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::device::DeviceRef;
use crate::DeviceError;

/// Client process identifier
pub type ProcessId = u32;

/// Operation carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read { offset: u64, size: usize },
    Write { offset: u64, size: usize },
}

/// Client I/O request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub requester: ProcessId,
    pub operation: Operation,
}

/// Final outcome of a request, ready to be replied to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub requester: ProcessId,
    pub operation: Operation,
    /// Bytes transferred, or the failure reported by the device
    pub result: Result<usize, DeviceError>,
}

struct Pending {
    device: DeviceRef,
    request: Request,
}

/// Requests waiting on their device
///
/// Completions are held until the owner drains them with
/// [`take_completions`](RequestQueue::take_completions).
#[derive(Default)]
pub struct RequestQueue {
    pending: VecDeque<Pending>,
    completed: Vec<Completion>,
    sweeps: u64,
}

/// Outcome of one attempt
enum Attempt {
    Done(Result<usize, DeviceError>),
    Again,
}

fn attempt(device: &DeviceRef, request: &Request) -> Attempt {
    let Some(device) = device.upgrade() else {
        return Attempt::Done(Err(DeviceError::NotFound));
    };

    // A device already borrowed is mid-call; try again on the next sweep
    let Ok(mut device) = device.try_borrow_mut() else {
        return Attempt::Again;
    };

    match device.process(request) {
        Err(DeviceError::RetryAgain) => Attempt::Again,
        result => Attempt::Done(result),
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt `request` on `device`, parking it if the device asks to retry
    ///
    /// Returns `true` if the request completed immediately.
    pub fn submit(&mut self, device: DeviceRef, request: Request) -> bool {
        match attempt(&device, &request) {
            Attempt::Done(result) => {
                self.complete(request, result);
                true
            }
            Attempt::Again => {
                log::trace!("Request from {} pending", request.requester);
                self.pending.push_back(Pending { device, request });
                false
            }
        }
    }

    /// Attempt every pending request once, oldest first
    pub fn retry_all(&mut self) {
        self.sweeps += 1;

        for _ in 0..self.pending.len() {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };

            match attempt(&entry.device, &entry.request) {
                Attempt::Done(result) => self.complete(entry.request, result),
                Attempt::Again => self.pending.push_back(entry),
            }
        }
    }

    /// Number of requests still waiting
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of sweeps run so far
    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    /// Drain completions in the order they completed
    ///
    /// Nothing else removes them; callers replying to clients must drain
    /// after each sweep.
    pub fn take_completions(&mut self) -> Vec<Completion> {
        core::mem::take(&mut self.completed)
    }

    fn complete(&mut self, request: Request, result: Result<usize, DeviceError>) {
        if let Err(err) = result {
            log::debug!("Request from {} failed: {}", request.requester, err);
        }
        self.completed.push(Completion {
            requester: request.requester,
            operation: request.operation,
            result,
        });
    }
}
