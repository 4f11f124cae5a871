// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Compressed trie with variable-size nodes.
//!
//! Branch nodes come in fan-out classes {1, 2, 4, 8, 16, 256} plus a
//! terminal data class carrying the `u32` value. A node address is a
//! 32-bit tagged handle `(class:3, index:29)`; the sentinel address 0
//! means "absent". When a node runs out of branch slots it is promoted
//! to the next wider class (copy, patch the parent's branch pointer,
//! free the old index). A key that ends where other keys continue is
//! represented by a data node under the sentinel byte `0xFF`, which is
//! illegal in UTF-8 and therefore cannot collide with a real
//! continuation byte. Key bytes `0x00` and `0xFF` are rejected.

use crate::{Error, Result};

/// Value type stored in the tree
pub type NodeData = u32;

type NodeAddress = u32;
type NodeIndex = u32;

const CLASS_SHIFT: u32 = 29;
const INDEX_MASK: u32 = (1 << CLASS_SHIFT) - 1;
const SENTINEL: u8 = 0xFF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
enum NodeClass {
    Data = 0,
    Node1 = 1,
    Node2 = 2,
    Node4 = 3,
    Node8 = 4,
    Node16 = 5,
    Node256 = 6,
}

fn class_of(addr: NodeAddress) -> NodeClass {
    match addr >> CLASS_SHIFT {
        0 => NodeClass::Data,
        1 => NodeClass::Node1,
        2 => NodeClass::Node2,
        3 => NodeClass::Node4,
        4 => NodeClass::Node8,
        5 => NodeClass::Node16,
        _ => NodeClass::Node256,
    }
}

fn index_of(addr: NodeAddress) -> usize {
    (addr & INDEX_MASK) as usize
}

fn address(class: NodeClass, idx: NodeIndex) -> NodeAddress {
    idx | ((class as u32) << CLASS_SHIFT)
}

trait NodeUnit: Default + Clone {
    fn successor(&self, b: u8) -> NodeAddress;
    /// Returns `false` when the node has no free slot.
    fn add(&mut self, b: u8, addr: NodeAddress) -> bool;
    fn unlink(&mut self, b: u8);
    fn branches(&self, out: &mut Vec<(u8, NodeAddress)>);
}

#[derive(Clone)]
struct SmallNode<const N: usize> {
    succ: [u8; N],
    node: [NodeAddress; N],
}

impl<const N: usize> Default for SmallNode<N> {
    fn default() -> Self {
        Self {
            succ: [0; N],
            node: [0; N],
        }
    }
}

impl<const N: usize> NodeUnit for SmallNode<N> {
    fn successor(&self, b: u8) -> NodeAddress {
        for (i, &s) in self.succ.iter().enumerate() {
            if s == b {
                return self.node[i];
            }
            if s == 0 {
                break;
            }
        }
        0
    }

    fn add(&mut self, b: u8, addr: NodeAddress) -> bool {
        for (i, &s) in self.succ.iter().enumerate() {
            if s == 0 {
                self.succ[i] = b;
                self.node[i] = addr;
                return true;
            }
        }
        false
    }

    fn unlink(&mut self, b: u8) {
        let Some(pos) = self.succ.iter().position(|&s| s == b) else {
            return;
        };
        for i in pos..N - 1 {
            self.succ[i] = self.succ[i + 1];
            self.node[i] = self.node[i + 1];
        }
        self.succ[N - 1] = 0;
        self.node[N - 1] = 0;
    }

    fn branches(&self, out: &mut Vec<(u8, NodeAddress)>) {
        for (i, &s) in self.succ.iter().enumerate() {
            if s == 0 {
                break;
            }
            out.push((s, self.node[i]));
        }
    }
}

#[derive(Clone)]
struct WideNode {
    node: Box<[NodeAddress; 256]>,
}

impl Default for WideNode {
    fn default() -> Self {
        Self {
            node: Box::new([0; 256]),
        }
    }
}

impl NodeUnit for WideNode {
    fn successor(&self, b: u8) -> NodeAddress {
        self.node[usize::from(b)]
    }

    fn add(&mut self, b: u8, addr: NodeAddress) -> bool {
        self.node[usize::from(b)] = addr;
        true
    }

    fn unlink(&mut self, b: u8) {
        self.node[usize::from(b)] = 0;
    }

    fn branches(&self, out: &mut Vec<(u8, NodeAddress)>) {
        for (b, &addr) in self.node.iter().enumerate() {
            if addr != 0 {
                #[allow(clippy::cast_possible_truncation)]
                out.push((b as u8, addr));
            }
        }
    }
}

struct NodeBlock<U> {
    units: Vec<U>,
    free_list: Vec<NodeIndex>,
}

impl<U: NodeUnit> Default for NodeBlock<U> {
    fn default() -> Self {
        Self {
            units: vec![],
            free_list: vec![],
        }
    }
}

impl<U: NodeUnit> NodeBlock<U> {
    /// Tail chains skip the free list so consecutive nodes stay
    /// spatially clustered.
    fn alloc(&mut self, use_free_list: bool) -> Result<NodeIndex> {
        if use_free_list {
            if let Some(idx) = self.free_list.pop() {
                self.units[idx as usize] = U::default();
                return Ok(idx);
            }
        }
        let idx = self.units.len();
        if idx >= INDEX_MASK as usize {
            return Err(Error::DictOverflow);
        }
        self.units.push(U::default());
        #[allow(clippy::cast_possible_truncation)]
        Ok(idx as NodeIndex)
    }

    fn free(&mut self, idx: NodeIndex) {
        self.free_list.push(idx);
    }

    fn clear(&mut self) {
        self.units.clear();
        self.free_list.clear();
    }
}

/// Compressed trie mapping byte strings to `u32` values
pub struct VarSizeNodeTree {
    // index 0 of the data vector is a dummy so that no data node ever
    // gets address 0 (the absent sentinel)
    data: Vec<NodeData>,
    block1: NodeBlock<SmallNode<1>>,
    block2: NodeBlock<SmallNode<2>>,
    block4: NodeBlock<SmallNode<4>>,
    block8: NodeBlock<SmallNode<8>>,
    block16: NodeBlock<SmallNode<16>>,
    block256: NodeBlock<WideNode>,
    root: NodeAddress,
    len: usize,
}

impl Default for VarSizeNodeTree {
    fn default() -> Self {
        Self {
            data: vec![0],
            block1: NodeBlock::default(),
            block2: NodeBlock::default(),
            block4: NodeBlock::default(),
            block8: NodeBlock::default(),
            block16: NodeBlock::default(),
            block256: NodeBlock::default(),
            root: 0,
            len: 0,
        }
    }
}

impl VarSizeNodeTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops all content, keeping the allocations of the node blocks.
    pub fn clear(&mut self) {
        self.data.clear();
        self.data.push(0);
        self.block1.clear();
        self.block2.clear();
        self.block4.clear();
        self.block8.clear();
        self.block16.clear();
        self.block256.clear();
        self.root = 0;
        self.len = 0;
    }

    /// Inserts or updates a key.
    pub fn set(&mut self, key: &[u8], data: NodeData) -> Result<()> {
        if key.is_empty() || key.contains(&0x00) || key.contains(&SENTINEL) {
            return Err(Error::CorruptTrie);
        }
        if self.root == 0 {
            self.root = address(NodeClass::Node1, self.block1.alloc(true)?);
        }

        let mut parent: Option<(NodeAddress, u8)> = None;
        let mut addr = self.root;
        let mut i = 0;

        while i < key.len() {
            let b = key[i];
            let next = self.successor(addr, b);
            if next == 0 {
                return self.add_tail(parent, addr, &key[i..], data);
            }
            if class_of(next) == NodeClass::Data {
                // the key continues past an existing leaf: interpose a
                // branch node holding the old value under the sentinel
                let mid_idx = self.block4.alloc(true)?;
                let mid = address(NodeClass::Node4, mid_idx);
                self.add_branch_raw(mid, SENTINEL, next);
                self.unlink(addr, b);
                self.add_branch_raw(addr, b, mid);
                parent = Some((addr, b));
                addr = mid;
            } else {
                parent = Some((addr, b));
                addr = next;
            }
            i += 1;
        }

        self.add_tail(parent, addr, &[], data)
    }

    /// Looks up a key.
    pub fn get(&self, key: &[u8]) -> Result<Option<NodeData>> {
        if self.root == 0 {
            return Ok(None);
        }
        let mut addr = self.root;
        for &b in key {
            addr = self.successor(addr, b);
            if addr == 0 {
                return Ok(None);
            }
        }
        if class_of(addr) == NodeClass::Data {
            return Ok(Some(self.data[index_of(addr)]));
        }
        let term = self.successor(addr, SENTINEL);
        if term == 0 {
            return Ok(None);
        }
        if class_of(term) != NodeClass::Data {
            return Err(Error::CorruptTrie);
        }
        Ok(Some(self.data[index_of(term)]))
    }

    /// Depth-first iteration in lexicographic key order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        let mut stack = vec![];
        if self.root != 0 {
            stack.push(Frame {
                branches: self.sorted_branches(self.root),
                next: 0,
                enter_len: 0,
            });
        }
        Iter {
            tree: self,
            stack,
            key: vec![],
        }
    }

    fn successor(&self, addr: NodeAddress, b: u8) -> NodeAddress {
        let idx = index_of(addr);
        match class_of(addr) {
            NodeClass::Data => 0,
            NodeClass::Node1 => self.block1.units[idx].successor(b),
            NodeClass::Node2 => self.block2.units[idx].successor(b),
            NodeClass::Node4 => self.block4.units[idx].successor(b),
            NodeClass::Node8 => self.block8.units[idx].successor(b),
            NodeClass::Node16 => self.block16.units[idx].successor(b),
            NodeClass::Node256 => self.block256.units[idx].successor(b),
        }
    }

    fn try_add_branch(&mut self, addr: NodeAddress, b: u8, follow: NodeAddress) -> bool {
        let idx = index_of(addr);
        match class_of(addr) {
            NodeClass::Data => false,
            NodeClass::Node1 => self.block1.units[idx].add(b, follow),
            NodeClass::Node2 => self.block2.units[idx].add(b, follow),
            NodeClass::Node4 => self.block4.units[idx].add(b, follow),
            NodeClass::Node8 => self.block8.units[idx].add(b, follow),
            NodeClass::Node16 => self.block16.units[idx].add(b, follow),
            NodeClass::Node256 => self.block256.units[idx].add(b, follow),
        }
    }

    // Used where the target is known to have a free slot.
    fn add_branch_raw(&mut self, addr: NodeAddress, b: u8, follow: NodeAddress) {
        let added = self.try_add_branch(addr, b, follow);
        debug_assert!(added, "branch slot must be free");
    }

    fn unlink(&mut self, addr: NodeAddress, b: u8) {
        let idx = index_of(addr);
        match class_of(addr) {
            NodeClass::Data => {}
            NodeClass::Node1 => self.block1.units[idx].unlink(b),
            NodeClass::Node2 => self.block2.units[idx].unlink(b),
            NodeClass::Node4 => self.block4.units[idx].unlink(b),
            NodeClass::Node8 => self.block8.units[idx].unlink(b),
            NodeClass::Node16 => self.block16.units[idx].unlink(b),
            NodeClass::Node256 => self.block256.units[idx].unlink(b),
        }
    }

    fn sorted_branches(&self, addr: NodeAddress) -> Vec<(u8, NodeAddress)> {
        let mut out = vec![];
        let idx = index_of(addr);
        match class_of(addr) {
            NodeClass::Data => {}
            NodeClass::Node1 => self.block1.units[idx].branches(&mut out),
            NodeClass::Node2 => self.block2.units[idx].branches(&mut out),
            NodeClass::Node4 => self.block4.units[idx].branches(&mut out),
            NodeClass::Node8 => self.block8.units[idx].branches(&mut out),
            NodeClass::Node16 => self.block16.units[idx].branches(&mut out),
            NodeClass::Node256 => self.block256.units[idx].branches(&mut out),
        }
        // the sentinel marks "key ends here" and must come before every
        // real continuation byte so iteration yields shorter keys first
        out.sort_by_key(|&(b, _)| if b == SENTINEL { 0 } else { u16::from(b) + 1 });
        out
    }

    /// Promotes a full node to the next wider class and returns the
    /// new address. The caller patches the incoming pointer.
    fn expand(&mut self, addr: NodeAddress) -> Result<NodeAddress> {
        let mut moved = vec![];
        let idx = index_of(addr);

        #[allow(clippy::cast_possible_truncation)]
        let new_addr = match class_of(addr) {
            NodeClass::Data | NodeClass::Node256 => return Err(Error::CorruptTrie),
            NodeClass::Node1 => {
                self.block1.units[idx].branches(&mut moved);
                self.block1.free(idx as NodeIndex);
                address(NodeClass::Node4, self.block4.alloc(true)?)
            }
            NodeClass::Node2 => {
                self.block2.units[idx].branches(&mut moved);
                self.block2.free(idx as NodeIndex);
                address(NodeClass::Node4, self.block4.alloc(true)?)
            }
            NodeClass::Node4 => {
                self.block4.units[idx].branches(&mut moved);
                self.block4.free(idx as NodeIndex);
                address(NodeClass::Node8, self.block8.alloc(true)?)
            }
            NodeClass::Node8 => {
                self.block8.units[idx].branches(&mut moved);
                self.block8.free(idx as NodeIndex);
                address(NodeClass::Node16, self.block16.alloc(true)?)
            }
            NodeClass::Node16 => {
                self.block16.units[idx].branches(&mut moved);
                self.block16.free(idx as NodeIndex);
                address(NodeClass::Node256, self.block256.alloc(true)?)
            }
        };

        for (b, follow) in moved {
            self.add_branch_raw(new_addr, b, follow);
        }
        Ok(new_addr)
    }

    /// Adds a branch, expanding the node when full and patching the
    /// parent pointer (or the root). Returns the node's address after
    /// a possible promotion.
    fn add_branch(
        &mut self,
        parent: Option<(NodeAddress, u8)>,
        addr: NodeAddress,
        b: u8,
        follow: NodeAddress,
    ) -> Result<NodeAddress> {
        if self.try_add_branch(addr, b, follow) {
            return Ok(addr);
        }
        let expanded = self.expand(addr)?;
        match parent {
            Some((paddr, pb)) => {
                self.unlink(paddr, pb);
                self.add_branch_raw(paddr, pb, expanded);
            }
            None => self.root = expanded,
        }
        if !self.try_add_branch(expanded, b, follow) {
            return Err(Error::CorruptTrie);
        }
        Ok(expanded)
    }

    fn alloc_data(&mut self, data: NodeData) -> Result<NodeAddress> {
        let idx = self.data.len();
        if idx >= INDEX_MASK as usize {
            return Err(Error::DictOverflow);
        }
        self.data.push(data);
        #[allow(clippy::cast_possible_truncation)]
        Ok(address(NodeClass::Data, idx as NodeIndex))
    }

    fn add_tail(
        &mut self,
        mut parent: Option<(NodeAddress, u8)>,
        mut addr: NodeAddress,
        tail: &[u8],
        data: NodeData,
    ) -> Result<()> {
        if tail.is_empty() {
            let term = self.successor(addr, SENTINEL);
            if term == 0 {
                let follow = self.alloc_data(data)?;
                self.add_branch(parent, addr, SENTINEL, follow)?;
                self.len += 1;
                return Ok(());
            }
            if class_of(term) != NodeClass::Data {
                return Err(Error::CorruptTrie);
            }
            self.data[index_of(term)] = data;
            return Ok(());
        }

        for (k, &b) in tail.iter().enumerate() {
            let follow = if k + 1 == tail.len() {
                self.alloc_data(data)?
            } else {
                // fresh allocation keeps tail chains clustered
                address(NodeClass::Node1, self.block1.alloc(false)?)
            };
            addr = self.add_branch(parent, addr, b, follow)?;
            parent = Some((addr, b));
            addr = follow;
        }
        self.len += 1;
        Ok(())
    }
}

struct Frame {
    branches: Vec<(u8, NodeAddress)>,
    next: usize,
    enter_len: usize,
}

/// Lexicographic depth-first iterator over the tree
pub struct Iter<'a> {
    tree: &'a VarSizeNodeTree,
    stack: Vec<Frame>,
    key: Vec<u8>,
}

impl Iterator for Iter<'_> {
    type Item = (Vec<u8>, NodeData);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;

            if top.next >= top.branches.len() {
                let enter_len = top.enter_len;
                self.stack.pop();
                self.key.truncate(enter_len);
                continue;
            }

            let (b, addr) = top.branches[top.next];
            top.next += 1;

            let before = self.key.len();
            if b != SENTINEL {
                self.key.push(b);
            }

            if class_of(addr) == NodeClass::Data {
                let out = (self.key.clone(), self.tree.data[index_of(addr)]);
                self.key.truncate(before);
                return Some(out);
            }

            self.stack.push(Frame {
                branches: self.tree.sorted_branches(addr),
                next: 0,
                enter_len: before,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn prefix_chain() {
        let mut tree = VarSizeNodeTree::new();
        tree.set(b"apple", 1).expect("insert");
        tree.set(b"applet", 2).expect("insert");
        tree.set(b"apply", 3).expect("insert");

        assert_eq!(Some(1), tree.get(b"apple").expect("find"));
        assert_eq!(Some(2), tree.get(b"applet").expect("find"));
        assert_eq!(Some(3), tree.get(b"apply").expect("find"));
        assert_eq!(None, tree.get(b"app").expect("find"));
        assert_eq!(None, tree.get(b"applets").expect("find"));
        assert_eq!(3, tree.len());
    }

    #[test]
    fn iteration_is_lexicographic() {
        let mut tree = VarSizeNodeTree::new();
        let mut words = vec![
            "zebra", "apple", "applet", "apply", "app", "banana", "band", "bandana", "a",
        ];
        for (i, w) in words.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            tree.set(w.as_bytes(), i as u32).expect("insert");
        }
        words.sort_unstable();

        let keys = tree
            .iter()
            .map(|(k, _)| String::from_utf8(k).expect("utf8"))
            .collect::<Vec<_>>();
        assert_eq!(words, keys);
    }

    #[test]
    fn update_overwrites() {
        let mut tree = VarSizeNodeTree::new();
        tree.set(b"cat", 1).expect("insert");
        tree.set(b"cat", 9).expect("update");
        assert_eq!(Some(9), tree.get(b"cat").expect("find"));
        assert_eq!(1, tree.len());
    }

    #[test]
    fn node_promotion() {
        // 300 distinct first bytes are impossible, but 200 distinct
        // second bytes force promotions up to the 256 class
        let mut tree = VarSizeNodeTree::new();
        for b in 1..=200u8 {
            if b == SENTINEL {
                continue;
            }
            tree.set(&[b'x', b], u32::from(b)).expect("insert");
        }
        for b in 1..=200u8 {
            if b == SENTINEL {
                continue;
            }
            assert_eq!(Some(u32::from(b)), tree.get(&[b'x', b]).expect("find"));
        }
    }

    #[test]
    fn shorter_key_after_longer() {
        let mut tree = VarSizeNodeTree::new();
        tree.set(b"alphabet", 1).expect("insert");
        tree.set(b"alpha", 2).expect("insert");

        assert_eq!(Some(1), tree.get(b"alphabet").expect("find"));
        assert_eq!(Some(2), tree.get(b"alpha").expect("find"));

        let keys = tree.iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(vec![b"alpha".to_vec(), b"alphabet".to_vec()], keys);
    }

    #[test]
    fn illegal_key_bytes_are_rejected() {
        let mut tree = VarSizeNodeTree::new();
        assert!(tree.set(b"", 1).is_err());
        assert!(tree.set(&[b'a', 0x00], 1).is_err());
        assert!(tree.set(&[b'a', 0xFF], 1).is_err());
    }

    #[test]
    fn clear_resets() {
        let mut tree = VarSizeNodeTree::new();
        tree.set(b"x", 1).expect("insert");
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(None, tree.get(b"x").expect("find"));
        tree.set(b"y", 2).expect("insert");
        assert_eq!(Some(2), tree.get(b"y").expect("find"));
    }

    #[test]
    fn dense_random_roundtrip() {
        let mut tree = VarSizeNodeTree::new();
        let mut keys = vec![];
        for i in 0..500u32 {
            let key = format!("k{:03}x{}", i % 97, i);
            tree.set(key.as_bytes(), i).expect("insert");
            keys.push((key, i));
        }
        for (key, v) in &keys {
            assert_eq!(Some(*v), tree.get(key.as_bytes()).expect("find"));
        }

        let mut sorted = keys.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>();
        sorted.sort_unstable();
        let iterated = tree
            .iter()
            .map(|(k, _)| String::from_utf8(k).expect("utf8"))
            .collect::<Vec<_>>();
        assert_eq!(sorted, iterated);
    }
}
