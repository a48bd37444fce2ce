//! Execution harness (component B) and reset orchestrator (component F).
//!
//! The coarse lock and the run/stop worker-thread shape are grounded on
//! `examples/jeanthom-clicky/src/devices/hd66753.rs`'s `Hd66753Renderer`:
//! a `crossbeam_channel::bounded(1)` kill channel paired with a `Drop` impl
//! that sends the kill signal and joins the thread, so tearing down a
//! running harness can never deadlock against its own worker.
//!
//! Per the concurrency Design Notes, the lock is reacquired once per `step`
//! rather than held for an entire `run()`, so `stop()` only ever needs the
//! worker to notice the kill signal between steps, not to release a
//! long-held lock.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{error, info};

use crate::board::{Buttons, Leds};
use crate::error::SimResult;
use crate::lcd::Lcd;
use crate::mcu::Mcu;
use crate::signal::pin_endpoint::Connector;
use crate::signal::pullup::PullupTracker;

/// Everything the worker thread touches, behind one coarse lock.
struct Inner {
    mcu: Mcu,
    pullups: PullupTracker,
    lcd: Lcd,
    leds: Leds,
    buttons: Buttons,
    reset_callbacks: Vec<Box<dyn FnMut() + Send>>,
}

impl Inner {
    fn step(&mut self) {
        self.mcu.step();
        if let Err(e) = self.lcd.tick(&mut self.mcu, &mut self.pullups) {
            error!("LCD fault: {e}; resetting");
            self.reset();
        }
    }

    /// Resets the MCU first, then every component, then runs every
    /// registered callback in registration order (component F).
    fn reset(&mut self) {
        self.mcu.reset();
        self.pullups.reset(&mut self.mcu);
        self.lcd.reset(&mut self.mcu, &mut self.pullups);
        self.leds.reset(&mut self.mcu, &mut self.pullups);
        self.buttons.reset(&mut self.mcu, &mut self.pullups);
        for cb in self.reset_callbacks.iter_mut() {
            cb();
        }
    }
}

/// Owns the simulated board: the MCU, the LCD, the LED/button devices, and
/// the worker thread that steps them.
pub struct Harness {
    inner: Arc<Mutex<Inner>>,
    worker: Option<JoinHandle<()>>,
    kill_tx: Option<crossbeam_channel::Sender<()>>,
}

impl Harness {
    pub fn new(lcd_wiring: [Connector; 7]) -> SimResult<Harness> {
        let mut mcu = Mcu::new();
        let mut pullups = PullupTracker::new();
        let mut lcd = Lcd::new(&mut mcu);
        lcd.connect(&mut mcu, &mut pullups, lcd_wiring)?;
        let mut leds = Leds::new(&mut mcu);
        leds.connect(&mut mcu, &mut pullups)?;
        let mut buttons = Buttons::new(&mut mcu);
        buttons.connect(&mut mcu, &mut pullups)?;

        Ok(Harness {
            inner: Arc::new(Mutex::new(Inner {
                mcu,
                pullups,
                lcd,
                leds,
                buttons,
                reset_callbacks: Vec::new(),
            })),
            worker: None,
            kill_tx: None,
        })
    }

    /// Resets the whole board, then loads `path`'s `PT_LOAD` segments into
    /// flash, matching the original's `LoadProgram` (reset before load so a
    /// board already mid-run doesn't keep stale peripheral state).
    pub fn load_firmware(&self, path: impl AsRef<std::path::Path>) -> SimResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.reset();
        inner.mcu.load_firmware(path)
    }

    /// Registers a callback fired, in registration order, after every
    /// `reset()` (immediately after `mcu.reset()` runs, before the next
    /// `step()`).
    pub fn on_reset(&self, cb: impl FnMut() + Send + 'static) {
        self.inner.lock().unwrap().reset_callbacks.push(Box::new(cb));
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().reset();
    }

    pub fn single_step(&self) {
        self.inner.lock().unwrap().step();
    }

    /// Spawns the worker thread, which steps the MCU until `stop()` sends
    /// the kill signal. Reacquires the lock once per step so `stop()`'s
    /// join can't deadlock against a lock held for the whole run.
    pub fn run(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let (kill_tx, kill_rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        self.worker = Some(std::thread::spawn(move || {
            info!("harness worker started");
            loop {
                if kill_rx.try_recv().is_ok() {
                    break;
                }
                inner.lock().unwrap().step();
            }
            info!("harness worker stopped");
        }));
        self.kill_tx = Some(kill_tx);
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn get_register(&self, index: u8) -> u8 {
        self.inner.lock().unwrap().mcu.read_register(index)
    }

    pub fn get_pc(&self) -> u32 {
        self.inner.lock().unwrap().mcu.read_pc_words()
    }

    pub fn get_io_register(&self, index: u8) -> u8 {
        self.inner.lock().unwrap().mcu.read_io(index)
    }

    pub fn leds(&self) -> u8 {
        let inner = self.inner.lock().unwrap();
        inner.leds.lit_mask(&inner.mcu)
    }

    pub fn press_button(&self, i: usize) {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        inner.buttons.press(&mut inner.mcu, &mut inner.pullups, i);
    }

    pub fn release_button(&self, i: usize) {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        inner.buttons.release(&mut inner.mcu, &mut inner.pullups, i);
    }

    pub fn ddram(&self) -> [u8; 80] {
        *self.inner.lock().unwrap().lcd.ddram()
    }

    /// Drives `port` pin `pin` to `value` from outside the board, bypassing
    /// any wired peripheral. Used by scripted tests that have no firmware
    /// to run; `board::Buttons`/`board::Leds` are the real callers in a
    /// normal simulation.
    pub fn drive_pin(&self, port: char, pin: u8, value: bool) -> SimResult<()> {
        let p = crate::mcu::port_from_letter(port)?;
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.pullups.set_pin(&mut inner.mcu, p, pin, value);
        Ok(())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop();
    }
}
