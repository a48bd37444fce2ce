//! The signal fabric: IRQ graph, pullup tracking, and pin endpoints
//! (component D's two halves plus component C).

pub mod irq;
pub mod pin_endpoint;
pub mod pullup;
