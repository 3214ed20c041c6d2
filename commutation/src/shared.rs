//! Controller shared between a commutation task and a command task

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::MotorConfig;
use crate::controller::{Command, Commutation, InitError, MotorController, MotorStatus};
use crate::driver::MotorDriver;

/// One lock around the whole controller
///
/// Speed, run flag and duty are always read and written together, so a
/// periodic `update()` never sees a half-applied command.
pub struct SharedMotor<M: RawMutex, D> {
    inner: Mutex<M, RefCell<MotorController<D>>>,
}

impl<M: RawMutex, D: MotorDriver> SharedMotor<M, D> {
    pub fn new(ctrl: MotorController<D>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ctrl)),
        }
    }

    pub fn init(driver: D, config: MotorConfig) -> Result<Self, InitError<D::Error>> {
        MotorController::init(driver, config).map(Self::new)
    }

    /// Run `f` with exclusive access to the controller
    pub fn lock<R>(&self, f: impl FnOnce(&mut MotorController<D>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn set_speed(&self, rpm: u16) {
        self.lock(|m| m.set_speed(rpm))
    }

    pub fn start(&self) {
        self.lock(|m| m.start())
    }

    pub fn stop(&self) {
        self.lock(|m| m.stop())
    }

    pub fn speed(&self) -> u16 {
        self.lock(|m| m.speed())
    }

    pub fn update(&self) -> Commutation {
        self.lock(|m| m.update())
    }

    pub fn status(&self) -> MotorStatus {
        self.lock(|m| m.status())
    }

    /// Execute a command and return the resulting status
    pub fn apply(&self, cmd: Command) -> MotorStatus {
        self.lock(|m| {
            m.execute(cmd);
            m.status()
        })
    }

    pub fn into_inner(self) -> MotorController<D> {
        self.inner.into_inner().into_inner()
    }
}
