/// Slot in a [`super::World`]. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub(crate) u32);

impl LocalId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Identity shared by server and clients for a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u32);

impl NetworkId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for NetworkId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Sequential ids for one authority domain. Domains use disjoint bases so
/// an id alone tells who allocated it.
#[derive(Debug, Clone)]
pub struct NetworkIdAllocator {
    base: u32,
    next: u32,
}

impl NetworkIdAllocator {
    pub const PLAYER_BASE: u32 = 1;
    pub const SERVER_BASE: u32 = 10_000;
    pub const BROADCAST_BASE: u32 = 20_000;

    pub fn new(base: u32) -> Self {
        Self { base, next: base }
    }

    pub fn players() -> Self {
        Self::new(Self::PLAYER_BASE)
    }

    pub fn server() -> Self {
        Self::new(Self::SERVER_BASE)
    }

    pub fn broadcast() -> Self {
        Self::new(Self::BROADCAST_BASE)
    }

    pub fn allocate(&mut self) -> NetworkId {
        let id = NetworkId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }

    pub fn peek(&self) -> NetworkId {
        NetworkId(self.next)
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_start_at_their_base() {
        assert_eq!(NetworkIdAllocator::players().allocate(), NetworkId(1));
        assert_eq!(NetworkIdAllocator::server().allocate(), NetworkId(10_000));

        let mut broadcast = NetworkIdAllocator::broadcast();
        assert_eq!(broadcast.allocate(), NetworkId(20_000));
        assert_eq!(broadcast.allocate(), NetworkId(20_001));
        broadcast.reset();
        assert_eq!(broadcast.peek(), NetworkId(20_000));
    }
}
