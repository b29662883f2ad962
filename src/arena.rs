//! Bump-allocating arena with union-find lifetime fusing.
//!
//! Blocks grow by `max(2*old, required, MIN_BLOCK)`, the same doubling
//! policy a growable buffer would use, just applied to whole blocks rather
//! than one contiguous region. Two or more arenas can be [`Arena::fuse`]d
//! so the memory backing either survives until every handle descended
//! from both has dropped.
//!
//! The union-find forest is a tree of `Rc<RefCell<ArenaNode>>` handles
//! rather than raw-pointer nodes compared by address; a monotonic creation
//! id stands in for "lower address wins" (that rule exists only to avoid
//! cycles, not to encode meaning into the choice of root).

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

const MIN_BLOCK: usize = 256;

struct Block {
    ptr: NonNull<u8>,
    cap: usize,
    layout: Layout,
}

impl Drop for Block {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

struct RootData {
    blocks: Vec<Block>,
    cur: *mut u8,
    end: *mut u8,
    /// When false, a failed bump allocation returns `None` instead of
    /// requesting a new block. A fixed-capacity arena also refuses to
    /// fuse with another arena.
    growable: bool,
    creation_id: u64,
}

impl RootData {
    fn new(growable: bool, initial_cap: usize, creation_id: u64) -> Self {
        let mut data = RootData {
            blocks: Vec::new(),
            cur: core::ptr::null_mut(),
            end: core::ptr::null_mut(),
            growable,
            creation_id,
        };
        if initial_cap > 0 {
            data.push_block(initial_cap);
        }
        data
    }

    fn push_block(&mut self, cap: usize) -> bool {
        let cap = cap.max(1);
        let Ok(layout) = Layout::from_size_align(cap, 8) else {
            return false;
        };
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            return false;
        };
        self.cur = ptr.as_ptr();
        self.end = unsafe { ptr.as_ptr().add(cap) };
        self.blocks.push(Block { ptr, cap, layout });
        true
    }

    fn last_block_cap(&self) -> usize {
        self.blocks.last().map(|b| b.cap).unwrap_or(0)
    }

    fn total_capacity(&self) -> usize {
        self.blocks.iter().map(|b| b.cap).sum()
    }

    fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let aligned = align_up(self.cur as usize, align) as *mut u8;
        let fits = !aligned.is_null()
            && (aligned as usize)
                .checked_add(size)
                .map(|end| end <= self.end as usize)
                .unwrap_or(false);
        if fits {
            self.cur = unsafe { aligned.add(size) };
            return NonNull::new(aligned);
        }
        if !self.growable {
            return None;
        }
        let required = size + align; // room to re-align inside the new block
        let new_cap = (2 * self.last_block_cap()).max(required).max(MIN_BLOCK);
        if !self.push_block(new_cap) {
            return None;
        }
        let aligned = align_up(self.cur as usize, align) as *mut u8;
        self.cur = unsafe { aligned.add(size) };
        NonNull::new(aligned)
    }
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

enum ArenaNode {
    Root(RootData),
    Child(Rc<RefCell<ArenaNode>>),
}

static NEXT_CREATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_creation_id() -> u64 {
    NEXT_CREATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A bump-allocation region. Handles may be [`Arena::fuse`]d together so
/// that the memory outlives whichever handle happens to drop first.
///
/// `Arena` is intentionally `!Sync`/`!Send` (it holds an `Rc`): nothing
/// about this type supports concurrent mutation from multiple threads, and
/// this is the cheapest way to have the type system enforce that rather
/// than relying on caller discipline.
pub struct Arena {
    node: Rc<RefCell<ArenaNode>>,
}

impl Arena {
    /// A growable arena: bump misses allocate a fresh block instead of
    /// failing.
    pub fn new() -> Self {
        Arena {
            node: Rc::new(RefCell::new(ArenaNode::Root(RootData::new(
                true,
                0,
                next_creation_id(),
            )))),
        }
    }

    /// A fixed-capacity arena: allocates `capacity` bytes up front and
    /// never grows. Exhausting it surfaces as an allocation failure
    /// (`OutOfMemory` to callers), and it can never be fused with another
    /// arena: a buffer that was never meant to be handed off to another
    /// owner can't be.
    pub fn new_fixed(capacity: usize) -> Self {
        Arena {
            node: Rc::new(RefCell::new(ArenaNode::Root(RootData::new(
                false,
                capacity,
                next_creation_id(),
            )))),
        }
    }

    fn find_root(&self) -> Rc<RefCell<ArenaNode>> {
        let next = {
            match &*self.node.borrow() {
                ArenaNode::Root(_) => return self.node.clone(),
                ArenaNode::Child(parent) => parent.clone(),
            }
        };
        let root = find_root_of(&next);
        // Path compression: point straight at the root next time.
        *self.node.borrow_mut() = ArenaNode::Child(root.clone());
        root
    }

    /// Bump-allocates `size` bytes aligned to `align` (must be a power of
    /// two), returning `None` on exhaustion of a non-growable arena or
    /// global allocator failure.
    pub fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let root = self.find_root();
        let mut root_ref = root.borrow_mut();
        let ArenaNode::Root(data) = &mut *root_ref else {
            unreachable!("find_root always returns a root node")
        };
        data.alloc(size, align)
    }

    /// Allocates `n` zero-initialized bytes, returning a mutable slice
    /// borrowed for as long as this handle (or a fused sibling) is kept
    /// alive.
    ///
    /// # Safety of the implementation
    /// The returned slice's lifetime is tied to `&self` rather than to the
    /// `RefCell` borrow used internally to find the bump pointer: the
    /// borrow is dropped before this function returns, but the bytes it
    /// points to live inside a `Block` owned by the root node, which
    /// cannot be deallocated while any `Arena` handle pointing into this
    /// union-find tree (this one included) is alive. This is the same
    /// technique `bumpalo` uses to hand out `&mut T` from `&self`.
    pub fn alloc_bytes<'a>(&'a self, n: usize) -> Option<&'a mut [u8]> {
        let ptr = self.alloc(n, 8)?;
        let slice = unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), n) };
        slice.fill(0);
        Some(slice)
    }

    /// Copies `bytes` into the arena, returning an owning view.
    pub fn dupe<'a>(&'a self, bytes: &[u8]) -> Option<&'a [u8]> {
        let dst = self.alloc_bytes(bytes.len())?;
        dst.copy_from_slice(bytes);
        Some(dst)
    }

    /// Links `self` and `other`'s lifetimes: the underlying memory of
    /// either is kept alive until every handle descended from both roots
    /// has been dropped. Returns `false` if either side is a fixed-capacity
    /// arena.
    pub fn fuse(&self, other: &Arena) -> bool {
        let root_a = self.find_root();
        let root_b = other.find_root();
        if Rc::ptr_eq(&root_a, &root_b) {
            return true;
        }
        let (growable_a, id_a) = root_info(&root_a);
        let (growable_b, id_b) = root_info(&root_b);
        if !growable_a || !growable_b {
            return false;
        }
        let (new_root, old_root) = if id_a < id_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        let old_blocks = {
            let mut old_ref = old_root.borrow_mut();
            let ArenaNode::Root(data) = &mut *old_ref else {
                unreachable!()
            };
            std::mem::take(&mut data.blocks)
        };
        {
            let mut new_ref = new_root.borrow_mut();
            let ArenaNode::Root(data) = &mut *new_ref else {
                unreachable!()
            };
            data.blocks.extend(old_blocks);
        }
        *old_root.borrow_mut() = ArenaNode::Child(new_root);
        true
    }

    /// Explicit counterpart to dropping the handle. Rust's `Drop` already
    /// releases the arena's share of the union-find tree when a handle
    /// goes out of scope; this exists for callers that want to make the
    /// release a visible call site rather than an implicit scope exit.
    pub fn deinit(self) {
        drop(self)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.find_root();
        let root_ref = root.borrow();
        let ArenaNode::Root(data) = &*root_ref else {
            unreachable!("find_root always returns a root node")
        };
        f.debug_struct("Arena")
            .field("growable", &data.growable)
            .field("blocks", &data.blocks.len())
            .field("capacity", &data.total_capacity())
            .finish()
    }
}

fn find_root_of(node: &Rc<RefCell<ArenaNode>>) -> Rc<RefCell<ArenaNode>> {
    let next = match &*node.borrow() {
        ArenaNode::Root(_) => return node.clone(),
        ArenaNode::Child(parent) => parent.clone(),
    };
    let root = find_root_of(&next);
    *node.borrow_mut() = ArenaNode::Child(root.clone());
    root
}

fn root_info(root: &Rc<RefCell<ArenaNode>>) -> (bool, u64) {
    match &*root.borrow() {
        ArenaNode::Root(data) => (data.growable, data.creation_id),
        ArenaNode::Child(_) => unreachable!("root_info called on a non-root"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocates_sequential_non_overlapping_regions() {
        let arena = Arena::new();
        let a = arena.alloc_bytes(16).unwrap();
        let a_ptr = a.as_ptr();
        let b = arena.alloc_bytes(16).unwrap();
        assert_ne!(a_ptr, b.as_ptr());
    }

    #[test]
    fn dupe_copies_bytes() {
        let arena = Arena::new();
        let view = arena.dupe(b"hello").unwrap();
        assert_eq!(view, b"hello");
    }

    #[test]
    fn growth_past_one_block_still_serves_allocations() {
        let arena = Arena::new();
        for _ in 0..10_000 {
            arena.alloc_bytes(64).unwrap();
        }
    }

    #[test]
    fn fixed_arena_runs_out_of_memory() {
        let arena = Arena::new_fixed(16);
        assert!(arena.alloc_bytes(8).is_some());
        assert!(arena.alloc_bytes(4096).is_none());
    }

    #[test]
    fn fuse_keeps_both_sides_allocations_alive() {
        let a = Arena::new();
        let b = Arena::new();
        let from_a = a.dupe(b"from a").unwrap().as_ptr();
        assert!(a.fuse(&b));
        let from_b = b.dupe(b"from b").unwrap();
        drop(a);
        // `from_a`'s bytes must still be valid: they were spliced into
        // whichever root won the fuse, which `b` still keeps alive.
        assert_eq!(unsafe { core::slice::from_raw_parts(from_a, 6) }, b"from a");
        assert_eq!(from_b, b"from b");
    }

    #[test]
    fn fuse_refused_for_fixed_capacity_arena() {
        let a = Arena::new();
        let b = Arena::new_fixed(64);
        assert!(!a.fuse(&b));
    }
}
