//! Identifiers for connections and circuits.
//!
//! Both kinds of identifier are handed out by a counter in the
//! connection manager, and are never reused within a process.

use std::fmt::{Display, Formatter};

/// Identifier for a connection known to a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

/// Identifier for a circuit known to a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircId(u64);

/// Counter for allocating both kinds of identifier.
#[derive(Debug, Default)]
pub(crate) struct IdAlloc {
    /// Next value to be handed out.
    next: u64,
}

impl IdAlloc {
    /// Return a fresh number.
    fn next(&mut self) -> u64 {
        let v = self.next;
        self.next += 1;
        assert!(self.next != 0, "Exhausted the identifier namespace");
        v
    }

    /// Allocate a new connection identifier.
    pub(crate) fn conn(&mut self) -> ConnId {
        ConnId(self.next())
    }

    /// Allocate a new circuit identifier.
    pub(crate) fn circ(&mut self) -> CircId {
        CircId(self.next())
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn {}", self.0)
    }
}

impl Display for CircId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circ {}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unique() {
        let mut a = IdAlloc::default();
        let c1 = a.conn();
        let c2 = a.conn();
        let x = a.circ();
        assert_ne!(c1, c2);
        assert_eq!(c1.to_string(), "Conn 0");
        assert_eq!(x.to_string(), "Circ 2");
    }
}
