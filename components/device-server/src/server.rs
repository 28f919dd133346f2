//! Device Server - Startup and interrupt dispatch
//!
//! Startup runs once:
//! ```text
//! Created -> DevicesInitializing -> DevicesReady -> Mounting -> Mounted
//!                    |                                  |
//!                    +-------------> Failed <-----------+
//! ```
//! `Mounted` and `Failed` are terminal. A failed server reports the error
//! through [`ServerError::exit_code`] and is expected to exit.

use alloc::collections::BTreeMap;
use alloc::rc::Weak;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::device::{DeviceRef, DeviceState};
use crate::fs::FileSystem;
use crate::irq::IrqSubscription;
use crate::registry::DeviceRegistry;
use crate::{DeviceError, Result, ServerError, Vector};

/// Startup progress of a device server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    DevicesInitializing,
    DevicesReady,
    Mounting,
    Mounted,
    Failed,
}

/// Callback bound to a vector, run for each notification on it
pub type IrqHandlerFn<F, S> = fn(&mut DeviceServer<F, S>, Vector);

struct Entry {
    device: DeviceRef,
    state: DeviceState,
}

/// Hosts devices, dispatches their interrupts and drives request retry
pub struct DeviceServer<F, S> {
    fs: F,
    irq: S,
    devices: Vec<Entry>,
    registry: DeviceRegistry,
    handlers: BTreeMap<Vector, IrqHandlerFn<F, S>>,
    state: ServerState,
}

impl<F: FileSystem, S: IrqSubscription> DeviceServer<F, S> {
    pub fn new(fs: F, irq: S) -> Self {
        Self {
            fs,
            irq,
            devices: Vec::new(),
            registry: DeviceRegistry::new(),
            handlers: BTreeMap::new(),
            state: ServerState::Created,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn filesystem_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn subscription(&self) -> &S {
        &self.irq
    }

    pub fn subscription_mut(&mut self) -> &mut S {
        &mut self.irq
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Lifecycle of every registered device, in registration order
    pub fn device_states(&self) -> impl Iterator<Item = DeviceState> + '_ {
        self.devices.iter().map(|entry| entry.state)
    }

    /// Handler bound to `vector`, if any
    pub fn handler(&self, vector: Vector) -> Option<IrqHandlerFn<F, S>> {
        self.handlers.get(&vector).copied()
    }

    /// Add `device` to the startup list and expose it at `path`
    ///
    /// Registering the same device twice adds two entries and two files.
    pub fn register_device(&mut self, device: DeviceRef, path: &str) -> Result<()> {
        self.expect_state(ServerState::Created)?;

        self.fs
            .register_file(device.clone(), path)
            .map_err(|code| ServerError::Registration {
                path: path.to_string(),
                code,
            })?;

        self.devices.push(Entry {
            device,
            state: DeviceState::Uninitialized,
        });
        log::debug!("Registered device file {}", path);
        Ok(())
    }

    /// Route interrupts on `vector` to `device`
    ///
    /// Devices sharing a vector are notified in registration order. The
    /// device is only added once the vector is watched and enabled.
    pub fn register_interrupt(&mut self, device: DeviceRef, vector: Vector) -> Result<()> {
        self.irq.watch(vector)?;
        self.irq.enable(vector)?;
        self.registry.register(vector, device);
        self.handlers.insert(vector, Self::interrupt_handler);
        log::debug!(
            "Vector {} bound ({} device(s))",
            vector,
            self.registry.devices(vector).len()
        );
        Ok(())
    }

    /// Bring every device up, then mount the namespace
    ///
    /// Stops at the first device that fails; later devices are not
    /// initialized and the namespace is not mounted.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(ServerState::Created)?;
        self.state = ServerState::DevicesInitializing;

        for index in 0..self.devices.len() {
            if let Err(err) = self.initialize_device(index) {
                self.state = ServerState::Failed;
                log::error!("{}", err);
                return Err(err);
            }
        }
        self.state = ServerState::DevicesReady;

        self.state = ServerState::Mounting;
        if let Err(code) = self.fs.mount() {
            self.state = ServerState::Failed;
            let err = ServerError::Mount {
                path: self.fs.mount_path().to_string(),
                code,
            };
            log::error!("{}", err);
            return Err(err);
        }

        self.state = ServerState::Mounted;
        log::info!(
            "Device server mounted at {} with {} device(s)",
            self.fs.mount_path(),
            self.devices.len()
        );
        Ok(())
    }

    /// Deliver a kernel notification for `vector` to its bound handler
    pub fn notify(&mut self, vector: Vector) -> Result<()> {
        let handler = self.handler(vector).ok_or_else(|| {
            log::warn!("Notification on unbound vector {}", vector);
            ServerError::UnhandledVector { vector }
        })?;
        handler(self, vector);
        Ok(())
    }

    /// Dispatch one interrupt on `vector`
    ///
    /// Every device on the vector sees it, in registration order. The
    /// vector is then acknowledged once and all pending requests are
    /// retried, even when no device is registered on it.
    pub fn interrupt_handler(&mut self, vector: Vector) {
        for device in self.registry.devices(vector) {
            let Some(device) = device.upgrade() else {
                log::warn!("Device on vector {} was dropped", vector);
                continue;
            };
            match device.try_borrow_mut() {
                Ok(mut device) => device.interrupt(vector),
                Err(_) => log::warn!("Device on vector {} is busy, interrupt skipped", vector),
            };
        }

        if let Err(err) = self.irq.acknowledge(vector) {
            log::error!("Failed to acknowledge vector {}: {}", vector, err);
        }

        self.fs.retry_all_requests();
    }

    fn expect_state(&self, expected: ServerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState {
                state: self.state,
                expected,
            })
        }
    }

    fn initialize_device(&mut self, index: usize) -> Result<()> {
        // A device registered twice is initialized once
        let target = &self.devices[index].device;
        let earlier = self.devices[..index]
            .iter()
            .find(|earlier| Weak::ptr_eq(&earlier.device, target))
            .map(|earlier| earlier.state);
        if let Some(state) = earlier {
            self.devices[index].state = state;
            return Ok(());
        }

        let Some(device) = self.devices[index].device.upgrade() else {
            self.devices[index].state = DeviceState::Failed;
            return Err(ServerError::Initialization {
                device: String::from("<dropped>"),
                code: DeviceError::NotFound,
            });
        };

        let outcome = match device.try_borrow_mut() {
            Ok(mut device) => {
                let identifier = device.identifier().to_string();
                device.initialize().map_err(|code| (identifier, code))
            }
            Err(_) => Err((String::from("<busy>"), DeviceError::IoError)),
        };

        match outcome {
            Ok(()) => {
                self.devices[index].state = DeviceState::Ready;
                Ok(())
            }
            Err((device, code)) => {
                self.devices[index].state = DeviceState::Failed;
                Err(ServerError::Initialization { device, code })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{handle, Device};
    use alloc::rc::Rc;
    use core::cell::RefCell;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Init(&'static str),
        Interrupt(&'static str, Vector),
        Watch(Vector),
        Enable(Vector),
        Ack(Vector),
        Sweep,
        Mount,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct Recorder {
        name: &'static str,
        init_result: core::result::Result<(), DeviceError>,
        log: Log,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                name,
                init_result: Ok(()),
                log: log.clone(),
            }))
        }

        fn failing(name: &'static str, code: DeviceError, log: &Log) -> Rc<RefCell<Self>> {
            let recorder = Self::new(name, log);
            recorder.borrow_mut().init_result = Err(code);
            recorder
        }
    }

    impl Device for Recorder {
        fn identifier(&self) -> &str {
            self.name
        }

        fn initialize(&mut self) -> core::result::Result<(), DeviceError> {
            self.log.borrow_mut().push(Event::Init(self.name));
            self.init_result
        }

        fn interrupt(&mut self, vector: Vector) {
            self.log.borrow_mut().push(Event::Interrupt(self.name, vector));
        }
    }

    struct RecordingFs {
        log: Log,
        mount_result: core::result::Result<(), DeviceError>,
        files: Vec<String>,
    }

    impl FileSystem for RecordingFs {
        fn mount_path(&self) -> &str {
            "/dev"
        }

        fn register_file(
            &mut self,
            _device: DeviceRef,
            path: &str,
        ) -> core::result::Result<(), DeviceError> {
            if !path.starts_with('/') {
                return Err(DeviceError::InvalidArgument);
            }
            self.files.push(path.to_string());
            Ok(())
        }

        fn mount(&mut self) -> core::result::Result<(), DeviceError> {
            self.log.borrow_mut().push(Event::Mount);
            self.mount_result
        }

        fn retry_all_requests(&mut self) {
            self.log.borrow_mut().push(Event::Sweep);
        }
    }

    struct RecordingIrq {
        log: Log,
        refuse_enable: bool,
    }

    impl IrqSubscription for RecordingIrq {
        fn watch(&mut self, vector: Vector) -> Result<()> {
            self.log.borrow_mut().push(Event::Watch(vector));
            Ok(())
        }

        fn enable(&mut self, vector: Vector) -> Result<()> {
            if self.refuse_enable {
                return Err(ServerError::Subscription {
                    vector,
                    reason: "refused",
                });
            }
            self.log.borrow_mut().push(Event::Enable(vector));
            Ok(())
        }

        fn acknowledge(&mut self, vector: Vector) -> Result<()> {
            self.log.borrow_mut().push(Event::Ack(vector));
            Ok(())
        }
    }

    type TestServer = DeviceServer<RecordingFs, RecordingIrq>;

    fn server(log: &Log) -> TestServer {
        server_with_mount(log, Ok(()))
    }

    fn server_with_mount(
        log: &Log,
        mount_result: core::result::Result<(), DeviceError>,
    ) -> TestServer {
        DeviceServer::new(
            RecordingFs {
                log: log.clone(),
                mount_result,
                files: Vec::new(),
            },
            RecordingIrq {
                log: log.clone(),
                refuse_enable: false,
            },
        )
    }

    fn events(log: &Log) -> Vec<Event> {
        core::mem::take(&mut *log.borrow_mut())
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        let v = Vector::new(48);

        let mut server = server(&log);
        server.register_interrupt(handle(&a), v).unwrap();
        server.register_interrupt(handle(&b), v).unwrap();
        events(&log);

        server.interrupt_handler(v);
        assert_eq!(
            events(&log),
            vec![
                Event::Interrupt("a", v),
                Event::Interrupt("b", v),
                Event::Ack(v),
                Event::Sweep,
            ]
        );
    }

    #[test]
    fn test_empty_vector_still_sweeps_once() {
        let log = Log::default();
        let mut server = server(&log);

        server.interrupt_handler(Vector::new(200));
        assert_eq!(events(&log), vec![Event::Ack(Vector::new(200)), Event::Sweep]);
    }

    #[test]
    fn test_register_interrupt_watches_and_binds() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let v = Vector::new(49);

        let mut server = server(&log);
        server.register_interrupt(handle(&a), v).unwrap();

        assert_eq!(events(&log), vec![Event::Watch(v), Event::Enable(v)]);
        assert!(server.handler(v).is_some());
        assert!(server.registry().contains(v));

        server.notify(v).unwrap();
        assert_eq!(
            events(&log),
            vec![Event::Interrupt("a", v), Event::Ack(v), Event::Sweep]
        );
    }

    #[test]
    fn test_notify_unbound_vector() {
        let log = Log::default();
        let mut server = server(&log);

        assert_eq!(
            server.notify(Vector::new(5)),
            Err(ServerError::UnhandledVector {
                vector: Vector::new(5)
            })
        );
        assert!(events(&log).is_empty());
    }

    #[test]
    fn test_only_vector_devices_are_interrupted() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);

        let mut server = server(&log);
        server.register_interrupt(handle(&a), Vector::new(48)).unwrap();
        server.register_interrupt(handle(&b), Vector::new(50)).unwrap();
        events(&log);

        server.notify(Vector::new(50)).unwrap();
        assert_eq!(
            events(&log),
            vec![
                Event::Interrupt("b", Vector::new(50)),
                Event::Ack(Vector::new(50)),
                Event::Sweep,
            ]
        );
    }

    #[test]
    fn test_startup_success() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);

        let mut server = server(&log);
        server.register_device(handle(&a), "/a").unwrap();
        server.register_device(handle(&b), "/b").unwrap();
        server.initialize().unwrap();

        assert_eq!(server.state(), ServerState::Mounted);
        assert_eq!(
            events(&log),
            vec![Event::Init("a"), Event::Init("b"), Event::Mount]
        );
        assert!(server.device_states().all(|s| s == DeviceState::Ready));
        assert_eq!(server.filesystem().files, vec!["/a", "/b"]);
    }

    #[test]
    fn test_device_failure_stops_startup() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::failing("b", DeviceError::IoError, &log);
        let c = Recorder::new("c", &log);

        let mut server = server(&log);
        for (device, path) in [(&a, "/a"), (&b, "/b"), (&c, "/c")] {
            server.register_device(handle(device), path).unwrap();
        }

        let err = server.initialize().unwrap_err();
        assert_eq!(
            err,
            ServerError::Initialization {
                device: "b".to_string(),
                code: DeviceError::IoError,
            }
        );
        assert_eq!(err.exit_code(), DeviceError::IoError.code());
        assert_eq!(server.state(), ServerState::Failed);
        assert_eq!(events(&log), vec![Event::Init("a"), Event::Init("b")]);

        let states: Vec<DeviceState> = server.device_states().collect();
        assert_eq!(
            states,
            vec![
                DeviceState::Ready,
                DeviceState::Failed,
                DeviceState::Uninitialized
            ]
        );
    }

    #[test]
    fn test_mount_failure_is_fatal() {
        let log = Log::default();
        let a = Recorder::new("a", &log);

        let mut server = server_with_mount(&log, Err(DeviceError::NotFound));
        server.register_device(handle(&a), "/a").unwrap();

        assert_eq!(
            server.initialize(),
            Err(ServerError::Mount {
                path: "/dev".to_string(),
                code: DeviceError::NotFound,
            })
        );
        assert_eq!(server.state(), ServerState::Failed);
        assert!(server.device_states().all(|s| s == DeviceState::Ready));
        assert_eq!(events(&log), vec![Event::Init("a"), Event::Mount]);
    }

    #[test]
    fn test_failed_binding_is_not_dispatched() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        let v = Vector::new(48);

        let mut server = server(&log);
        server.subscription_mut().refuse_enable = true;
        assert!(server.register_interrupt(handle(&a), v).is_err());
        assert!(!server.registry().contains(v));
        assert!(server.handler(v).is_none());

        server.subscription_mut().refuse_enable = false;
        server.register_interrupt(handle(&b), v).unwrap();
        events(&log);

        server.notify(v).unwrap();
        assert_eq!(
            events(&log),
            vec![Event::Interrupt("b", v), Event::Ack(v), Event::Sweep]
        );
    }

    #[test]
    fn test_busy_device_does_not_stop_siblings() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        let v = Vector::new(48);

        let mut server = server(&log);
        server.register_interrupt(handle(&a), v).unwrap();
        server.register_interrupt(handle(&b), v).unwrap();
        events(&log);

        {
            let _busy = a.borrow();
            server.interrupt_handler(v);
        }
        assert_eq!(
            events(&log),
            vec![Event::Interrupt("b", v), Event::Ack(v), Event::Sweep]
        );
    }

    #[test]
    fn test_initialize_runs_once() {
        let log = Log::default();
        let mut server = server(&log);
        server.initialize().unwrap();

        assert_eq!(
            server.initialize(),
            Err(ServerError::InvalidState {
                state: ServerState::Mounted,
                expected: ServerState::Created,
            })
        );
        assert_eq!(events(&log), vec![Event::Mount]);
    }

    #[test]
    fn test_duplicate_device_initialized_once() {
        let log = Log::default();
        let a = Recorder::new("a", &log);

        let mut server = server(&log);
        server.register_device(handle(&a), "/a").unwrap();
        server.register_device(handle(&a), "/a").unwrap();
        server.initialize().unwrap();

        assert_eq!(events(&log), vec![Event::Init("a"), Event::Mount]);
        assert_eq!(server.device_states().count(), 2);
        assert_eq!(server.filesystem().files.len(), 2);
    }

    #[test]
    fn test_dropped_device_fails_startup() {
        let log = Log::default();
        let a = Recorder::new("a", &log);

        let mut server = server(&log);
        server.register_device(handle(&a), "/a").unwrap();
        drop(a);

        assert!(matches!(
            server.initialize(),
            Err(ServerError::Initialization {
                code: DeviceError::NotFound,
                ..
            })
        ));
    }

    #[test]
    fn test_dropped_device_skipped_in_dispatch() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        let v = Vector::new(48);

        let mut server = server(&log);
        server.register_interrupt(handle(&a), v).unwrap();
        server.register_interrupt(handle(&b), v).unwrap();
        drop(a);
        events(&log);

        server.interrupt_handler(v);
        assert_eq!(
            events(&log),
            vec![Event::Interrupt("b", v), Event::Ack(v), Event::Sweep]
        );
    }

    #[test]
    fn test_registration_error() {
        let log = Log::default();
        let a = Recorder::new("a", &log);
        let mut server = server(&log);

        let err = server.register_device(handle(&a), "a").unwrap_err();
        assert_eq!(
            err,
            ServerError::Registration {
                path: "a".to_string(),
                code: DeviceError::InvalidArgument,
            }
        );
        assert_eq!(server.device_states().count(), 0);
    }
}
