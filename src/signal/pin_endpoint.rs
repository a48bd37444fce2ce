//! Pin endpoints (component D, the connector half).
//!
//! Grounded on `examples/original_source/WalnutApp/src/IoConnector.h`'s
//! `IoConnector<N>` and the `Connectable<N>` CRTP base in
//! `examples/original_source/WalnutApp/src/WalnutApp.cpp` (`LEDsLayer`,
//! `ButtonsLayer`, `LCDLayer`), reworked as a const-generic struct instead of
//! a template parameterised on pin count.

use log::debug;

use crate::error::{SimError, SimResult};
use crate::mcu::{port_from_letter, Mcu};
use crate::signal::irq::IrqId;
use crate::signal::pullup::PullupTracker;

/// One `(port letter, pin index)` slot a connector's pin N binds to.
pub type Connector = (char, u8);

/// A fixed-size bundle of externally-allocated IRQs bound bidirectionally to
/// `N` MCU port pins, e.g. the LCD's 7-wire 4-bit bus or the LED board's
/// 8-wire port.
pub struct PinEndpoint<const N: usize> {
    irqs: [IrqId; N],
    bindings: [Option<(usize, u8)>; N],
    defaults: [bool; N],
}

impl<const N: usize> PinEndpoint<N> {
    /// Allocates `N` fresh external IRQs, one per connector pin, each
    /// defaulting to `defaults[i]` once bound.
    pub fn new(mcu: &mut Mcu, defaults: [bool; N]) -> PinEndpoint<N> {
        PinEndpoint {
            irqs: std::array::from_fn(|_| mcu.alloc_irq()),
            bindings: [None; N],
            defaults,
        }
    }

    /// Binds every slot to an MCU port pin and pushes the slot's default
    /// level into the pullup tracker. Call `on_finished_connect` once every
    /// endpoint sharing an MCU has been connected so the flush lands
    /// atomically, matching the original's `OnFinishedConnect` hook.
    pub fn connect(
        &mut self,
        mcu: &mut Mcu,
        pullups: &mut PullupTracker,
        connectors: [Connector; N],
    ) -> SimResult<()> {
        for (i, (letter, pin)) in connectors.into_iter().enumerate() {
            let port = port_from_letter(letter)?;
            if pin > 7 {
                return Err(SimError::ProgrammingError(format!("pin {pin} out of range")));
            }
            let mcu_irq = mcu.get_irq(port, pin);
            mcu.connect(self.irqs[i], mcu_irq);
            self.bindings[i] = Some((port, pin));
            pullups.set_pin(mcu, port, pin, self.defaults[i]);
            debug!("connector slot {i} bound to {letter}{pin}");
        }
        pullups.on_finished_connect(mcu);
        Ok(())
    }

    /// The external-side IRQ for slot `i`, for subscribing edge-detection
    /// callbacks (e.g. the LCD's enable-pulse watcher).
    pub fn irq(&self, i: usize) -> IrqId {
        self.irqs[i]
    }

    /// Restores every bound slot to its default level.
    pub fn reset(&self, mcu: &mut Mcu, pullups: &mut PullupTracker) {
        for (i, binding) in self.bindings.iter().enumerate() {
            if let Some((port, pin)) = binding {
                pullups.set_pin(mcu, *port, *pin, self.defaults[i]);
            }
        }
    }

    /// Drives slot `i` to `value` from the peripheral side.
    pub fn set_pin(&self, mcu: &mut Mcu, pullups: &mut PullupTracker, i: usize, value: bool) {
        if let Some((port, pin)) = self.bindings[i] {
            pullups.set_pin(mcu, port, pin, value);
            mcu.raise(self.irqs[i], value as u32);
        }
    }

    /// Drives every selected slot (bit `i` of `selection_mask`) to the
    /// matching bit of `value_mask`.
    pub fn set_pin_mask(&self, mcu: &mut Mcu, pullups: &mut PullupTracker, selection_mask: u32, value_mask: u32) {
        for i in 0..N {
            if selection_mask & (1 << i) != 0 {
                self.set_pin(mcu, pullups, i, value_mask & (1 << i) != 0);
            }
        }
    }

    /// Reads slot `i`'s current level off the MCU's `PIN` register — the
    /// operation the original's `GetPin` never actually performed (see
    /// `DESIGN.md`'s resolution of that Open Question).
    pub fn get_pin(&self, mcu: &Mcu, i: usize) -> bool {
        use bit_field::BitField;
        match self.bindings[i] {
            Some((port, pin)) => mcu.read_io(crate::avr::pin_index(port) as u8).get_bit(pin as usize),
            None => false,
        }
    }

    /// Reads every bound slot into a bitmask, slot `i` at bit `i`.
    pub fn get_pin_mask(&self, mcu: &Mcu) -> u32 {
        (0..N).fold(0u32, |acc, i| acc | ((self.get_pin(mcu, i) as u32) << i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::pullup::PullupTracker;

    #[test]
    fn connect_pushes_defaults_into_pullups() {
        let mut mcu = Mcu::new();
        let mut pullups = PullupTracker::new();
        let mut ep: PinEndpoint<4> = PinEndpoint::new(&mut mcu, [true, false, true, true]);
        ep.connect(&mut mcu, &mut pullups, [('C', 0), ('C', 1), ('C', 6), ('C', 7)])
            .unwrap();
        assert_eq!(ep.get_pin(&mcu, 1), false);
        assert_eq!(ep.get_pin(&mcu, 0), true);
    }

    #[test]
    fn set_pin_updates_the_bound_mcu_pin() {
        let mut mcu = Mcu::new();
        let mut pullups = PullupTracker::new();
        let mut ep: PinEndpoint<1> = PinEndpoint::new(&mut mcu, [true]);
        ep.connect(&mut mcu, &mut pullups, [('A', 3)]).unwrap();
        ep.set_pin(&mut mcu, &mut pullups, 0, false);
        assert_eq!(ep.get_pin(&mcu, 0), false);
    }

    #[test]
    fn reset_restores_default_levels() {
        let mut mcu = Mcu::new();
        let mut pullups = PullupTracker::new();
        let mut ep: PinEndpoint<1> = PinEndpoint::new(&mut mcu, [true]);
        ep.connect(&mut mcu, &mut pullups, [('B', 2)]).unwrap();
        ep.set_pin(&mut mcu, &mut pullups, 0, false);
        ep.reset(&mut mcu, &mut pullups);
        assert_eq!(ep.get_pin(&mcu, 0), true);
    }

    #[test]
    fn rejects_out_of_range_pin() {
        let mut mcu = Mcu::new();
        let mut pullups = PullupTracker::new();
        let mut ep: PinEndpoint<1> = PinEndpoint::new(&mut mcu, [true]);
        assert!(ep.connect(&mut mcu, &mut pullups, [('A', 9)]).is_err());
    }
}
