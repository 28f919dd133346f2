//! IRQ Subscription - Kernel interrupt notification plumbing
//!
//! The server asks to be notified of a vector (`watch`), unmasks it
//! (`enable`), and after each delivered interrupt re-arms it
//! (`acknowledge`). [`ControllerSubscription`] drives an [`IntController`]
//! directly, for servers that own the controller of their core.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use int_controller::IntController;

use crate::{Result, ServerError, Vector};

/// Interrupt notification capability
pub trait IrqSubscription {
    /// Request notifications for `vector`
    fn watch(&mut self, vector: Vector) -> Result<()>;

    /// Unmask `vector` so it can be delivered
    fn enable(&mut self, vector: Vector) -> Result<()>;

    /// Signal end-of-interrupt for `vector`
    fn acknowledge(&mut self, vector: Vector) -> Result<()>;
}

/// Subscription served by a shared interrupt controller
pub struct ControllerSubscription<C> {
    controller: Rc<RefCell<C>>,
    watched: Vec<Vector>,
}

impl<C: IntController> ControllerSubscription<C> {
    pub fn new(controller: Rc<RefCell<C>>) -> Self {
        Self {
            controller,
            watched: Vec::new(),
        }
    }

    /// Controller behind this subscription
    pub fn controller(&self) -> &Rc<RefCell<C>> {
        &self.controller
    }

    /// Whether notifications for `vector` were requested
    pub fn is_watched(&self, vector: Vector) -> bool {
        self.watched.contains(&vector)
    }

    fn with_controller<T>(
        &self,
        vector: Vector,
        f: impl FnOnce(&mut C) -> int_controller::Result<T>,
    ) -> Result<T> {
        let mut controller =
            self.controller
                .try_borrow_mut()
                .map_err(|_| ServerError::Subscription {
                    vector,
                    reason: "controller busy",
                })?;
        Ok(f(&mut *controller)?)
    }
}

impl<C: IntController> IrqSubscription for ControllerSubscription<C> {
    fn watch(&mut self, vector: Vector) -> Result<()> {
        if !self.is_watched(vector) {
            self.watched.push(vector);
        }
        log::debug!("Watching vector {}", vector);
        Ok(())
    }

    fn enable(&mut self, vector: Vector) -> Result<()> {
        if !self.is_watched(vector) {
            return Err(ServerError::Subscription {
                vector,
                reason: "vector not watched",
            });
        }
        self.with_controller(vector, |c| c.enable(vector))
    }

    fn acknowledge(&mut self, vector: Vector) -> Result<()> {
        self.with_controller(vector, |c| c.clear(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use int_controller::apic::LvtFlags;
    use int_controller::mock::MockRegisters;
    use int_controller::{ApicConfig, ControllerError, LocalApic, Register, TIMER_VECTOR};

    fn subscription() -> ControllerSubscription<LocalApic<MockRegisters>> {
        let mut apic = LocalApic::new(MockRegisters::new(), ApicConfig::default());
        apic.initialize().unwrap();
        ControllerSubscription::new(Rc::new(RefCell::new(apic)))
    }

    fn timer_masked(sub: &ControllerSubscription<LocalApic<MockRegisters>>) -> bool {
        let value = sub
            .controller()
            .borrow()
            .registers()
            .value(Register::Timer.offset());
        value & LvtFlags::MASKED.bits() != 0
    }

    #[test]
    fn test_enable_requires_watch() {
        let mut sub = subscription();
        assert!(matches!(
            sub.enable(TIMER_VECTOR),
            Err(ServerError::Subscription { .. })
        ));
        assert!(timer_masked(&sub));

        sub.watch(TIMER_VECTOR).unwrap();
        sub.enable(TIMER_VECTOR).unwrap();
        assert!(!timer_masked(&sub));
    }

    #[test]
    fn test_acknowledge_writes_eoi() {
        let mut sub = subscription();
        sub.acknowledge(Vector::new(50)).unwrap();
        sub.acknowledge(Vector::new(50)).unwrap();

        let eoi = sub
            .controller()
            .borrow()
            .registers()
            .writes_to(Register::EndOfInterrupt.offset());
        assert_eq!(eoi, 2);
    }

    #[test]
    fn test_controller_error_is_propagated() {
        let mut sub = subscription();
        sub.watch(Vector::new(3)).unwrap();
        assert!(matches!(
            sub.enable(Vector::new(3)),
            Err(ServerError::Controller(ControllerError::InvalidIrq { .. }))
        ));
    }

    #[test]
    fn test_busy_controller() {
        let mut sub = subscription();
        let controller = sub.controller().clone();
        let _guard = controller.borrow_mut();

        assert_eq!(
            sub.acknowledge(TIMER_VECTOR),
            Err(ServerError::Subscription {
                vector: TIMER_VECTOR,
                reason: "controller busy",
            })
        );
    }

    #[test]
    fn test_watch_is_idempotent() {
        let mut sub = subscription();
        sub.watch(TIMER_VECTOR).unwrap();
        sub.watch(TIMER_VECTOR).unwrap();
        assert!(sub.is_watched(TIMER_VECTOR));
        assert_eq!(sub.watched.len(), 1);
    }
}
