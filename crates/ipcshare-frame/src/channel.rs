//! Role-partitioned channel ids.
//!
//! Both endpoints open channels without negotiating: the initiator numbers
//! its channels in the low 32 bits of the id, the acceptor in the high 32
//! bits. An id is never zero and no id can be produced by both sides.

use std::sync::atomic::{AtomicU32, Ordering};

use ipcshare_transport::Role;

use crate::error::{FrameError, Result};

const LOW_MASK: u64 = 0xFFFF_FFFF;

/// Hands out channel ids from one role's half of the id space.
#[derive(Debug)]
pub struct ChannelIdAllocator {
    role: Role,
    counter: AtomicU32,
}

impl ChannelIdAllocator {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            counter: AtomicU32::new(0),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The next id in sequence. Wraps after 2^32 - 1 ids, skipping zero.
    pub fn next_id(&self) -> i64 {
        loop {
            let seq = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if seq != 0 {
                return compose(self.role, seq);
            }
        }
    }

    /// The next id for which `in_use` returns false.
    pub fn allocate(&self, mut in_use: impl FnMut(i64) -> bool) -> Result<i64> {
        for _ in 0..u32::MAX {
            let id = self.next_id();
            if !in_use(id) {
                return Ok(id);
            }
        }
        Err(FrameError::IdSpaceExhausted)
    }
}

/// Which role allocated `id`, or `None` if the id lies in neither half.
pub fn originated_by(id: i64) -> Option<Role> {
    let raw = id as u64;
    match (raw >> 32, raw & LOW_MASK) {
        (0, 0) => None,
        (0, _) => Some(Role::Initiator),
        (_, 0) => Some(Role::Acceptor),
        _ => None,
    }
}

fn compose(role: Role, seq: u32) -> i64 {
    match role {
        Role::Initiator => i64::from(seq),
        Role::Acceptor => ((seq as u64) << 32) as i64,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn initiator_uses_low_half() {
        let ids = ChannelIdAllocator::new(Role::Initiator);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(originated_by(2), Some(Role::Initiator));
    }

    #[test]
    fn acceptor_uses_high_half() {
        let ids = ChannelIdAllocator::new(Role::Acceptor);
        assert_eq!(ids.next_id(), 1 << 32);
        assert_eq!(ids.next_id(), 2 << 32);
        assert_eq!(originated_by(2 << 32), Some(Role::Acceptor));
    }

    #[test]
    fn acceptor_ids_cover_sign_bit() {
        let id = compose(Role::Acceptor, u32::MAX);
        assert!(id < 0);
        assert_eq!(originated_by(id), Some(Role::Acceptor));
    }

    #[test]
    fn mixed_and_zero_ids_have_no_origin() {
        assert_eq!(originated_by(0), None);
        assert_eq!(originated_by((1 << 32) | 1), None);
    }

    #[test]
    fn opposite_roles_never_collide() {
        let left = ChannelIdAllocator::new(Role::Initiator);
        let right = ChannelIdAllocator::new(Role::Acceptor);

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(left.next_id()));
            assert!(seen.insert(right.next_id()));
        }
    }

    #[test]
    fn wraparound_skips_zero() {
        let ids = ChannelIdAllocator::new(Role::Initiator);
        ids.counter.store(u32::MAX - 1, Ordering::Relaxed);
        assert_eq!(ids.next_id(), i64::from(u32::MAX));
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn allocate_skips_ids_in_use() {
        let ids = ChannelIdAllocator::new(Role::Initiator);
        let taken: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let id = ids.allocate(|id| taken.contains(&id)).unwrap();
        assert_eq!(id, 4);
    }
}
