//! The clock: a circular list of Resident frames and a cursor sweeping it.
//!
//! Links are stored in an arena indexed by frame number rather than in the
//! frames themselves, so inserting and removing are index rewrites.

use super::{frame_table::FrameTable, FrameNumber, Page};
use alloc::{boxed::Box, vec};
use pagesrv_shared::eprintln;

#[derive(Clone, Copy, Default)]
struct Link {
    prev: FrameNumber,
    next: FrameNumber,
    linked: bool,
}

/// A frame picked for eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Victim {
    pub frame: FrameNumber,
    /// How many ring positions the cursor visited to find it.
    pub scanned: usize,
}

pub struct EvictionRing {
    links: Box<[Link]>,
    cursor: Option<FrameNumber>,
    len: usize,
}

impl EvictionRing {
    pub fn new(frame_count: usize) -> Self {
        Self {
            links: vec![Link::default(); frame_count].into_boxed_slice(),
            cursor: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.links[frame].linked
    }

    pub fn cursor(&self) -> Option<FrameNumber> {
        self.cursor
    }

    /// Adds a frame just behind the cursor, making it the last one the
    /// current sweep will reach.
    pub fn insert(&mut self, frame: FrameNumber) {
        if self.links[frame].linked {
            debug_assert!(false, "frame {frame} already in ring");
            eprintln!("eviction ring: frame {} inserted twice", frame);
            return;
        }

        let Some(cursor) = self.cursor else {
            self.links[frame] = Link {
                prev: frame,
                next: frame,
                linked: true,
            };
            self.cursor = Some(frame);
            self.len = 1;
            return;
        };

        let prev = self.links[cursor].prev;
        self.links[frame] = Link {
            prev,
            next: cursor,
            linked: true,
        };
        self.links[prev].next = frame;
        self.links[cursor].prev = frame;
        self.len += 1;
    }

    /// Takes a frame out of the ring. Returns `false` if it was not in it.
    ///
    /// If the cursor pointed at it, the cursor moves on to its successor.
    pub fn remove(&mut self, frame: FrameNumber) -> bool {
        let link = self.links[frame];
        if !link.linked {
            return false;
        }

        self.links[frame] = Link::default();
        self.len -= 1;

        if self.len == 0 {
            self.cursor = None;
            return true;
        }

        self.links[link.prev].next = link.next;
        self.links[link.next].prev = link.prev;
        if self.cursor == Some(frame) {
            self.cursor = Some(link.next);
        }
        true
    }

    /// Second-chance selection.
    ///
    /// Starting at the cursor, every frame with its reference bit set has the
    /// bit cleared, is reported to `second_chance` together with its owner,
    /// and is skipped. The first frame found with a clear bit is the victim
    /// and the cursor is left just past it. The victim stays in the ring; the
    /// caller removes it when it pins the frame.
    ///
    /// One sweep clears every bit, so a victim turns up within `len + 1`
    /// steps, well inside two rotations. Returns `None` only for an empty
    /// ring.
    pub fn select_victim(
        &mut self,
        frames: &mut FrameTable,
        mut second_chance: impl FnMut(FrameNumber, Option<Page>),
    ) -> Option<Victim> {
        let mut current = self.cursor?;

        for scanned in 1..=2 * self.len {
            if frames.is_referenced(current) {
                frames.set_referenced(current, false);
                second_chance(current, frames.owner_of(current));
                current = self.links[current].next;
            } else {
                self.cursor = Some(self.links[current].next);
                return Some(Victim {
                    frame: current,
                    scanned,
                });
            }
        }

        debug_assert!(false, "clock sweep found no victim in two rotations");
        None
    }

    /// Ring members in sweep order, starting at the cursor.
    pub fn iter(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        let mut next = self.cursor;
        (0..self.len).map_while(move |_| {
            let frame = next?;
            next = Some(self.links[frame].next);
            Some(frame)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::rights::Rights;
    use alloc::vec::Vec;

    /// A table with `count` resident frames, all inserted into a ring in
    /// frame order.
    fn resident_ring(count: usize) -> (FrameTable, EvictionRing) {
        let mut frames = FrameTable::new(count);
        let mut ring = EvictionRing::new(count);
        for vpn in 0..count {
            let frame = frames.allocate_free().unwrap();
            frames.mark_resident(frame, Page::new(1, vpn as u32), Rights::READ);
            ring.insert(frame);
        }
        (frames, ring)
    }

    fn members(ring: &EvictionRing) -> Vec<FrameNumber> {
        ring.iter().collect()
    }

    #[test]
    fn test_insert_goes_behind_cursor() {
        let (_, ring) = resident_ring(4);
        assert_eq!(ring.cursor(), Some(0));
        assert_eq!(members(&ring), [0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_cursor_advances() {
        let (_, mut ring) = resident_ring(3);
        assert!(ring.remove(0));
        assert_eq!(ring.cursor(), Some(1));
        assert_eq!(members(&ring), [1, 2]);
        assert!(!ring.remove(0));
        assert!(ring.remove(1));
        assert!(ring.remove(2));
        assert!(ring.is_empty());
        assert_eq!(ring.cursor(), None);
        assert!(members(&ring).is_empty());
    }

    #[test]
    fn test_remove_middle_keeps_order() {
        let (_, mut ring) = resident_ring(4);
        ring.remove(2);
        assert_eq!(members(&ring), [0, 1, 3]);
        ring.insert(2);
        assert_eq!(members(&ring), [0, 1, 3, 2]);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_double_insert_leaves_ring_intact() {
        let (_, mut ring) = resident_ring(2);
        ring.insert(1);
        assert_eq!(ring.len(), 2);
        assert_eq!(members(&ring), [0, 1]);
    }

    #[test]
    fn test_unreferenced_victim_is_cursor() {
        let (mut frames, mut ring) = resident_ring(3);
        let victim = ring.select_victim(&mut frames, |_, _| panic!()).unwrap();
        assert_eq!(victim, Victim { frame: 0, scanned: 1 });
        assert_eq!(ring.cursor(), Some(1));
    }

    #[test]
    fn test_second_chance_clears_and_skips() {
        let (mut frames, mut ring) = resident_ring(3);
        frames.set_referenced(0, true);
        frames.set_referenced(1, true);

        let mut spared = Vec::new();
        let victim = ring
            .select_victim(&mut frames, |frame, owner| spared.push((frame, owner)))
            .unwrap();

        assert_eq!(victim.frame, 2);
        assert_eq!(
            spared,
            [(0, Some(Page::new(1, 0))), (1, Some(Page::new(1, 1)))]
        );
        assert!(!frames.is_referenced(0));
        assert!(!frames.is_referenced(1));
        assert_eq!(ring.cursor(), Some(0));
    }

    #[test]
    fn test_all_referenced_terminates_within_two_rotations() {
        for len in 1..8 {
            let (mut frames, mut ring) = resident_ring(len);
            for frame in 0..len {
                frames.set_referenced(frame, true);
            }
            let victim = ring.select_victim(&mut frames, |_, _| {}).unwrap();
            assert_eq!(victim.frame, 0);
            assert!(victim.scanned <= 2 * len);
            assert!(!frames.is_referenced(victim.frame));
        }
    }

    #[test]
    fn test_empty_ring_has_no_victim() {
        let mut frames = FrameTable::new(1);
        let mut ring = EvictionRing::new(1);
        assert_eq!(ring.select_victim(&mut frames, |_, _| {}), None);
    }

    #[test]
    fn test_ring_matches_resident_set_under_churn() {
        let (mut frames, mut ring) = resident_ring(5);
        for round in 0..50usize {
            frames.set_referenced(round % 5, round % 3 == 0);
            let victim = ring.select_victim(&mut frames, |_, _| {}).unwrap();
            ring.remove(victim.frame);
            frames.mark_pinned(victim.frame);
            frames.unpin(victim.frame);
            ring.insert(victim.frame);

            let mut seen = members(&ring);
            seen.sort_unstable();
            assert_eq!(seen, [0, 1, 2, 3, 4]);
            assert_eq!(ring.len(), frames.resident_count());
        }
    }
}
