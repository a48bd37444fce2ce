//! Bidirectional 1-bit signal graph (component D, the IRQ half).
//!
//! Grounded on `examples/original_source/WalnutApp/src/IoConnector.h`'s
//! bidirectional pin binding and the "avr_irq"-style callback fan-out it
//! wraps, and named after `crate::signal::irq::Sender` as used in
//! `examples/jeanthom-clicky/src/devices/platform/pp/eide.rs`. Implemented
//! as an arena of nodes indexed by integer handle, per the Design Notes'
//! "avoid owning-reference cycles" strategy for the graph's inherent
//! cyclicity.

use std::collections::HashMap;

use log::debug;

/// Opaque handle to a single signal endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqId(usize);

type Callback = Box<dyn FnMut(u32) + Send>;

struct Node {
    value: u32,
    links: Vec<IrqId>,
    callbacks: Vec<Callback>,
}

/// Arena owning every IRQ node, MCU-owned and externally-allocated alike.
#[derive(Default)]
pub struct Pool {
    nodes: Vec<Node>,
    names: HashMap<String, IrqId>,
}

impl Pool {
    pub fn new() -> Pool {
        Pool::default()
    }

    pub fn alloc(&mut self) -> IrqId {
        let id = IrqId(self.nodes.len());
        self.nodes.push(Node {
            value: 0,
            links: Vec::new(),
            callbacks: Vec::new(),
        });
        id
    }

    pub fn alloc_named(&mut self, name: impl Into<String>) -> IrqId {
        let id = self.alloc();
        self.names.insert(name.into(), id);
        id
    }

    pub fn value(&self, id: IrqId) -> u32 {
        self.nodes[id.0].value
    }

    /// Binds `a` and `b` bidirectionally: raising either propagates to the
    /// other (subject to the value-equality guard in `raise`).
    pub fn connect(&mut self, a: IrqId, b: IrqId) {
        self.nodes[a.0].links.push(b);
        self.nodes[b.0].links.push(a);
    }

    /// Tears down every link between `a` and `b`.
    pub fn disconnect(&mut self, a: IrqId, b: IrqId) {
        self.nodes[a.0].links.retain(|&x| x != b);
        self.nodes[b.0].links.retain(|&x| x != a);
    }

    pub fn subscribe(&mut self, id: IrqId, cb: Callback) {
        self.nodes[id.0].callbacks.push(cb);
    }

    pub fn clear_callbacks(&mut self, id: IrqId) {
        self.nodes[id.0].callbacks.clear();
    }

    /// Updates `id`'s value and notifies its callbacks and linked nodes.
    /// A no-op if `value` already matches the current value — the guard
    /// that keeps the cyclic external/MCU binding from looping forever.
    pub fn raise(&mut self, id: IrqId, value: u32) {
        self.raise_inner(id, value, None);
    }

    fn raise_inner(&mut self, id: IrqId, value: u32, came_from: Option<IrqId>) {
        if self.nodes[id.0].value == value {
            return;
        }
        debug!("irq {} raised to {value}", id.0);
        self.nodes[id.0].value = value;

        let callback_count = self.nodes[id.0].callbacks.len();
        for i in 0..callback_count {
            // Work around the borrow checker: temporarily take the callback
            // out so it can mutably access the rest of `self` if it needs to
            // (none of ours currently do, but the signature allows it).
            let mut cb = std::mem::replace(
                &mut self.nodes[id.0].callbacks[i],
                Box::new(|_| {}),
            );
            cb(value);
            self.nodes[id.0].callbacks[i] = cb;
        }

        let links = self.nodes[id.0].links.clone();
        for link in links {
            if Some(link) == came_from {
                continue;
            }
            self.raise_inner(link, value, Some(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_propagates_across_a_bidirectional_link() {
        let mut pool = Pool::new();
        let a = pool.alloc();
        let b = pool.alloc();
        pool.connect(a, b);
        pool.raise(a, 1);
        assert_eq!(pool.value(b), 1);
    }

    #[test]
    fn raise_with_same_value_is_a_no_op() {
        let mut pool = Pool::new();
        let a = pool.alloc();
        let calls = std::sync::Arc::new(std::sync::Mutex::new(0));
        let calls2 = calls.clone();
        pool.subscribe(a, Box::new(move |_| *calls2.lock().unwrap() += 1));
        pool.raise(a, 0); // already 0
        assert_eq!(*calls.lock().unwrap(), 0);
        pool.raise(a, 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn cyclic_graph_does_not_infinite_loop() {
        let mut pool = Pool::new();
        let a = pool.alloc();
        let b = pool.alloc();
        let c = pool.alloc();
        pool.connect(a, b);
        pool.connect(b, c);
        pool.connect(c, a);
        pool.raise(a, 1);
        assert_eq!(pool.value(b), 1);
        assert_eq!(pool.value(c), 1);
    }

    #[test]
    fn disconnect_stops_propagation() {
        let mut pool = Pool::new();
        let a = pool.alloc();
        let b = pool.alloc();
        pool.connect(a, b);
        pool.disconnect(a, b);
        pool.raise(a, 1);
        assert_eq!(pool.value(b), 0);
    }
}
