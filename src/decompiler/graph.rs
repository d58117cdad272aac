//! Ordered item sequence stored in an arena.
//!
//! Items are never removed, so an [`ItemId`] stays valid for the graph's
//! lifetime and keeps pointing at the same item however many items get
//! inserted around it.

use crate::decompiler::item::GraphItem;
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(usize);

#[derive(Debug, Clone)]
struct Node {
    item: GraphItem,
    prev: Option<ItemId>,
    next: Option<ItemId>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    head: Option<ItemId>,
    tail: Option<ItemId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn front(&self) -> Option<ItemId> {
        self.head
    }

    pub fn next(&self, id: ItemId) -> Option<ItemId> {
        self.nodes[id.0].next
    }

    pub fn prev(&self, id: ItemId) -> Option<ItemId> {
        self.nodes[id.0].prev
    }

    pub fn push_back(&mut self, item: GraphItem) -> ItemId {
        let id = ItemId(self.nodes.len());
        self.nodes.push(Node {
            item,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.nodes[tail.0].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Insert `item` directly before `at`.
    pub fn insert_before(&mut self, at: ItemId, item: GraphItem) -> ItemId {
        let id = ItemId(self.nodes.len());
        let prev = self.nodes[at.0].prev;
        self.nodes.push(Node {
            item,
            prev,
            next: Some(at),
        });
        self.nodes[at.0].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.0].next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// First item in sequence order carrying code position `pos`.
    pub fn find_pos(&self, pos: u16) -> Option<ItemId> {
        self.iter().find(|(_, item)| item.pos == pos).map(|(id, _)| id)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            graph: self,
            cur: self.head,
        }
    }
}

impl Index<ItemId> for Graph {
    type Output = GraphItem;

    fn index(&self, id: ItemId) -> &GraphItem {
        &self.nodes[id.0].item
    }
}

impl IndexMut<ItemId> for Graph {
    fn index_mut(&mut self, id: ItemId) -> &mut GraphItem {
        &mut self.nodes[id.0].item
    }
}

pub struct Iter<'a> {
    graph: &'a Graph,
    cur: Option<ItemId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (ItemId, &'a GraphItem);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        self.cur = self.graph.next(id);
        Some((id, &self.graph[id]))
    }
}
