//! Ambient evaluation-board devices (component H): the 8 LEDs and 4 buttons
//! wired onto port C in the reference board, alongside the LCD.
//!
//! Grounded on `examples/original_source/WalnutApp/src/WalnutApp.cpp`'s
//! `LEDsLayer` (8 pins, port C, idle-high default, `GetPinMask()` for
//! rendering) and `ButtonsLayer` (4 pins at C{0,1,6,7}, idle-high default,
//! pressing pulls the line low).

use crate::error::SimResult;
use crate::mcu::Mcu;
use crate::signal::pin_endpoint::PinEndpoint;
use crate::signal::pullup::PullupTracker;

/// 8 LEDs on port C, each lighting when its pin is driven low (matching the
/// reference board's active-low wiring).
pub struct Leds {
    bus: PinEndpoint<8>,
}

impl Leds {
    pub fn new(mcu: &mut Mcu) -> Leds {
        Leds {
            bus: PinEndpoint::new(mcu, [true; 8]),
        }
    }

    pub fn connect(&mut self, mcu: &mut Mcu, pullups: &mut PullupTracker) -> SimResult<()> {
        let connectors = std::array::from_fn(|i| ('C', i as u8));
        self.bus.connect(mcu, pullups, connectors)
    }

    pub fn reset(&mut self, mcu: &mut Mcu, pullups: &mut PullupTracker) {
        self.bus.reset(mcu, pullups);
    }

    /// Bit `i` set means LED `i` is lit (its pin driven low).
    pub fn lit_mask(&self, mcu: &Mcu) -> u8 {
        !(self.bus.get_pin_mask(mcu) as u8)
    }
}

/// 4 buttons at port C pins 0, 1, 6, and 7. Idle high; pressing pulls the
/// line low.
pub struct Buttons {
    bus: PinEndpoint<4>,
}

const BUTTON_PINS: [u8; 4] = [0, 1, 6, 7];

impl Buttons {
    pub fn new(mcu: &mut Mcu) -> Buttons {
        Buttons {
            bus: PinEndpoint::new(mcu, [true; 4]),
        }
    }

    pub fn connect(&mut self, mcu: &mut Mcu, pullups: &mut PullupTracker) -> SimResult<()> {
        let connectors = BUTTON_PINS.map(|pin| ('C', pin));
        self.bus.connect(mcu, pullups, connectors)
    }

    pub fn reset(&mut self, mcu: &mut Mcu, pullups: &mut PullupTracker) {
        self.bus.reset(mcu, pullups);
    }

    /// Presses button `i` (0..4), pulling its line low.
    pub fn press(&self, mcu: &mut Mcu, pullups: &mut PullupTracker, i: usize) {
        self.bus.set_pin(mcu, pullups, i, false);
    }

    /// Releases button `i`, letting its pull-up return the line high.
    pub fn release(&self, mcu: &mut Mcu, pullups: &mut PullupTracker, i: usize) {
        self.bus.set_pin(mcu, pullups, i, true);
    }

    pub fn is_pressed(&self, mcu: &Mcu, i: usize) -> bool {
        !self.bus.get_pin(mcu, i)
    }
}
