use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::btree::{self, cell_key, InternalNode, LeafNode, Node, NodeError};
use crate::config::DbConfig;
use crate::constants::*;
use crate::pager::{Pager, PagerError};
use crate::row::{deserialize_row, serialize_row, Row, RowError};

pub struct Table {
    pub root_page_num: u32,
    pager: Pager,
    closed: bool,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Pager(#[from] PagerError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Row(#[from] RowError),
    #[error("Error: Duplicate key.")]
    DuplicateKey(u32),
    #[error("Error: Table full.")]
    TableFull,
    #[error("Corrupt tree: page {child} is not a child of page {parent}")]
    OrphanPage { child: u32, parent: u32 },
}

// Where a key lives, or would live, inside its leaf.
struct Position {
    page_num: u32,
    cell_num: usize,
    num_cells: usize,
    found: bool,
}

enum Descent {
    Leaf(Position),
    Child(u32),
}

impl Table {
    pub fn open<P>(filename: P) -> Result<Self, TableError>
    where
        P: AsRef<Path>,
    {
        Self::open_with_config(filename, DbConfig::default())
    }

    pub fn open_with_config<P>(filename: P, config: DbConfig) -> Result<Self, TableError>
    where
        P: AsRef<Path>,
    {
        let mut pager = Pager::new(filename, config.max_pages)?;
        if pager.num_pages() == 0 {
            // new database file: page 0 becomes an empty root leaf
            let root_page = pager.get_page_mut(0)?;
            let mut root = LeafNode::initialize(&mut root_page.buffer[..]);
            root.set_root(true);
            info!("initialized empty database");
        }
        info!(pages = pager.num_pages(), "opened table");
        Ok(Table {
            root_page_num: 0,
            pager,
            closed: false,
        })
    }

    /// Flushes every page touched during the session and releases the file.
    pub fn close(mut self) -> Result<(), TableError> {
        self.closed = true;
        self.pager.flush_all()?;
        info!(pages = self.pager.num_pages(), "closed table");
        Ok(())
    }

    pub fn num_pages(&self) -> u32 {
        self.pager.num_pages()
    }

    fn node(&mut self, page_num: u32) -> Result<Node<&[u8]>, TableError> {
        let page = self.pager.get_page(page_num)?;
        Ok(Node::new(&page.buffer[..])?)
    }

    fn leaf(&mut self, page_num: u32) -> Result<LeafNode<&[u8]>, TableError> {
        let page = self.pager.get_page(page_num)?;
        Ok(LeafNode::new(&page.buffer[..])?)
    }

    fn leaf_mut(&mut self, page_num: u32) -> Result<LeafNode<&mut [u8]>, TableError> {
        let page = self.pager.get_page_mut(page_num)?;
        Ok(LeafNode::new(&mut page.buffer[..])?)
    }

    fn internal(&mut self, page_num: u32) -> Result<InternalNode<&[u8]>, TableError> {
        let page = self.pager.get_page(page_num)?;
        Ok(InternalNode::new(&page.buffer[..])?)
    }

    fn internal_mut(&mut self, page_num: u32) -> Result<InternalNode<&mut [u8]>, TableError> {
        let page = self.pager.get_page_mut(page_num)?;
        Ok(InternalNode::new(&mut page.buffer[..])?)
    }

    /// Root flag and parent pointer, which every node type carries.
    fn header(&mut self, page_num: u32) -> Result<(bool, u32), TableError> {
        let page = self.pager.get_page(page_num)?;
        Ok((btree::is_root(&page.buffer), btree::parent(&page.buffer)))
    }

    fn set_parent_of(&mut self, page_num: u32, parent: u32) -> Result<(), TableError> {
        let page = self.pager.get_page_mut(page_num)?;
        btree::set_parent(&mut page.buffer, parent);
        Ok(())
    }

    fn locate(&mut self, key: u32) -> Result<Position, TableError> {
        let mut page_num = self.root_page_num;
        loop {
            let step = match self.node(page_num)? {
                Node::Leaf(leaf) => {
                    let (cell_num, found) = match leaf.find(key) {
                        Ok(index) => (index, true),
                        Err(index) => (index, false),
                    };
                    Descent::Leaf(Position {
                        page_num,
                        cell_num,
                        num_cells: leaf.num_cells() as usize,
                        found,
                    })
                }
                Node::Internal(node) => Descent::Child(node.child(node.find_child(key))),
            };
            match step {
                Descent::Leaf(position) => return Ok(position),
                Descent::Child(child) => page_num = child,
            }
        }
    }

    /// Returns the position of the given key. If the key is not present,
    /// returns the position where it should be inserted.
    pub fn find(&mut self, key: u32) -> Result<Cursor, TableError> {
        let position = self.locate(key)?;
        Ok(Cursor {
            table: self,
            page_num: position.page_num,
            cell_num: position.cell_num as u32,
            end_of_table: position.cell_num >= position.num_cells,
        })
    }

    /// A cursor at the smallest key.
    pub fn start(&mut self) -> Result<Cursor, TableError> {
        // every stored id is positive, so 0 sorts before all of them
        let position = self.locate(0)?;
        Ok(Cursor {
            table: self,
            page_num: position.page_num,
            cell_num: 0,
            end_of_table: position.num_cells == 0,
        })
    }

    /// Largest key in the subtree rooted at `page_num`.
    fn max_key(&mut self, page_num: u32) -> Result<u32, TableError> {
        let mut page_num = page_num;
        loop {
            let next = match self.node(page_num)? {
                Node::Leaf(leaf) => return Ok(leaf.max_key().unwrap_or(0)),
                Node::Internal(node) => node.right_child(),
            };
            page_num = next;
        }
    }

    pub fn insert(&mut self, row: &Row) -> Result<(), TableError> {
        let key = row.id();
        let position = self.locate(key)?;
        if position.found {
            return Err(TableError::DuplicateKey(key));
        }

        if position.num_cells >= LEAF_NODE_MAX_CELLS {
            let needed = self.pages_needed_for_split(position.page_num)?;
            let available = self
                .pager
                .max_pages()
                .saturating_sub(self.pager.num_pages() as usize);
            if needed > available {
                warn!(key, needed, available, "no room left to split leaf");
                return Err(TableError::TableFull);
            }
        }

        let value = serialize_row(row);
        self.leaf_insert(position, key, &value)
    }

    /// Counts the pages a split starting at `leaf_page_num` will allocate:
    /// one per split node, plus one more if the split reaches the root.
    fn pages_needed_for_split(&mut self, leaf_page_num: u32) -> Result<usize, TableError> {
        let mut needed = 1;
        let mut page_num = leaf_page_num;
        loop {
            let (is_root, parent) = self.header(page_num)?;
            if is_root {
                return Ok(needed + 1);
            }
            if (self.internal(parent)?.num_keys() as usize) < INTERNAL_NODE_MAX_KEYS {
                return Ok(needed);
            }
            needed += 1;
            page_num = parent;
        }
    }

    fn leaf_insert(
        &mut self,
        position: Position,
        key: u32,
        value: &[u8; ROW_SIZE],
    ) -> Result<(), TableError> {
        if position.num_cells >= LEAF_NODE_MAX_CELLS {
            return self.leaf_split_and_insert(position, key, value);
        }

        let mut leaf = self.leaf_mut(position.page_num)?;
        leaf.shift_cells_right(position.cell_num);
        leaf.write_cell(position.cell_num, key, value);
        leaf.set_num_cells(position.num_cells as u32 + 1);
        Ok(())
    }

    /// Moves the upper half of a full leaf, plus the new cell, into a fresh
    /// leaf to its right and then links that leaf into the parent.
    fn leaf_split_and_insert(
        &mut self,
        position: Position,
        key: u32,
        value: &[u8; ROW_SIZE],
    ) -> Result<(), TableError> {
        let old_page_num = position.page_num;
        let (was_root, parent, next_leaf, mut cells) = {
            let old = self.leaf(old_page_num)?;
            let cells: Vec<[u8; LEAF_NODE_CELL_SIZE]> = (0..position.num_cells)
                .map(|i| {
                    let mut cell = [0u8; LEAF_NODE_CELL_SIZE];
                    cell.copy_from_slice(old.cell(i));
                    cell
                })
                .collect();
            (old.is_root(), old.parent(), old.next_leaf(), cells)
        };

        let mut new_cell = [0u8; LEAF_NODE_CELL_SIZE];
        new_cell[LEAF_NODE_KEY_OFFSET..LEAF_NODE_VALUE_OFFSET].copy_from_slice(&key.to_le_bytes());
        new_cell[LEAF_NODE_VALUE_OFFSET..].copy_from_slice(value);
        cells.insert(position.cell_num, new_cell);

        let (lower, upper) = cells.split_at(LEAF_NODE_LEFT_SPLIT_COUNT);

        let new_page_num = self.pager.unused_page_num();
        {
            let new_page = self.pager.get_page_mut(new_page_num)?;
            let mut new_leaf = LeafNode::initialize(&mut new_page.buffer[..]);
            new_leaf.set_parent(parent);
            new_leaf.set_next_leaf(next_leaf);
            for (i, cell) in upper.iter().enumerate() {
                new_leaf.cell_mut(i).copy_from_slice(cell);
            }
            new_leaf.set_num_cells(upper.len() as u32);
        }
        {
            let mut old = self.leaf_mut(old_page_num)?;
            for (i, cell) in lower.iter().enumerate() {
                old.cell_mut(i).copy_from_slice(cell);
            }
            old.set_num_cells(lower.len() as u32);
            old.set_next_leaf(new_page_num);
        }
        debug!(
            old_page_num,
            new_page_num,
            left = lower.len(),
            right = upper.len(),
            "split leaf"
        );

        if was_root {
            return self.create_new_root(new_page_num);
        }

        let lower_max = cell_key(&lower[lower.len() - 1]);
        self.update_separator(parent, old_page_num, lower_max)?;
        self.internal_insert(parent, new_page_num)
    }

    /// Sets the separator that follows `child` in `parent` to `key`. The right
    /// child has no separator of its own.
    fn update_separator(&mut self, parent: u32, child: u32, key: u32) -> Result<(), TableError> {
        let mut node = self.internal_mut(parent)?;
        match node.child_index(child) {
            Some(index) if index < node.num_keys() as usize => {
                node.set_key(index, key);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(TableError::OrphanPage { child, parent }),
        }
    }

    /// Adds `child` to `parent`, splitting full internal nodes on the way up.
    fn internal_insert(&mut self, parent: u32, child: u32) -> Result<(), TableError> {
        let mut parent = parent;
        let mut child = child;
        loop {
            let child_max = self.max_key(child)?;
            let num_keys = self.internal(parent)?.num_keys() as usize;
            if num_keys < INTERNAL_NODE_MAX_KEYS {
                return self.internal_insert_with_room(parent, child, child_max);
            }

            let sibling = self.internal_split_and_insert(parent, child, child_max)?;
            let (was_root, grandparent) = self.header(parent)?;
            if was_root {
                return self.create_new_root(sibling);
            }

            let lower_max = self.max_key(parent)?;
            self.update_separator(grandparent, parent, lower_max)?;
            parent = grandparent;
            child = sibling;
        }
    }

    fn internal_insert_with_room(
        &mut self,
        parent: u32,
        child: u32,
        child_max: u32,
    ) -> Result<(), TableError> {
        let right_child = self.internal(parent)?.right_child();
        let right_max = self.max_key(right_child)?;

        let mut node = self.internal_mut(parent)?;
        let num_keys = node.num_keys() as usize;
        if child_max > right_max {
            // the new child takes over as right child
            node.set_cell(num_keys, right_child, right_max);
            node.set_right_child(child);
        } else {
            let index = node.find_child(child_max);
            node.shift_cells_right(index);
            node.set_cell(index, child, child_max);
        }
        node.set_num_keys(num_keys as u32 + 1);
        Ok(())
    }

    /// Splits a full internal node around the incoming child and returns the
    /// page number of the new right sibling.
    fn internal_split_and_insert(
        &mut self,
        page_num: u32,
        child: u32,
        child_max: u32,
    ) -> Result<u32, TableError> {
        let (mut entries, right_child, parent) = {
            let node = self.internal(page_num)?;
            let entries: Vec<(u32, u32)> = (0..node.num_keys() as usize)
                .map(|i| (node.child(i), node.key(i)))
                .collect();
            (entries, node.right_child(), node.parent())
        };
        let right_max = self.max_key(right_child)?;
        entries.push((right_child, right_max));

        let index = entries.partition_point(|(_, key)| *key < child_max);
        entries.insert(index, (child, child_max));

        let split = entries.len() / 2;
        let (lower, upper) = entries.split_at(split);

        let sibling = self.pager.unused_page_num();
        {
            let page = self.pager.get_page_mut(sibling)?;
            let mut node = InternalNode::initialize(&mut page.buffer[..]);
            node.set_parent(parent);
            node.set_children(upper);
        }
        self.internal_mut(page_num)?.set_children(lower);

        for (moved, _) in upper {
            self.set_parent_of(*moved, sibling)?;
        }
        if index < split {
            self.set_parent_of(child, page_num)?;
        }
        debug!(
            page_num,
            sibling,
            left = lower.len(),
            right = upper.len(),
            "split internal node"
        );
        Ok(sibling)
    }

    /// Handles splitting the root. The old root's content moves to a new
    /// page that becomes the left child; the root page is rewritten as an
    /// internal node with one key, so the root page number never changes.
    fn create_new_root(&mut self, right_child: u32) -> Result<(), TableError> {
        let root_page_num = self.root_page_num;
        let root_buffer = self.pager.get_page(root_page_num)?.buffer;

        let left_child = self.pager.unused_page_num();
        {
            let page = self.pager.get_page_mut(left_child)?;
            page.buffer = root_buffer;
            btree::set_root(&mut page.buffer, false);
            btree::set_parent(&mut page.buffer, root_page_num);
        }

        // children of a copied internal root still point at the root page
        let grandchildren: Vec<u32> = match self.node(left_child)? {
            Node::Internal(node) => (0..=node.num_keys() as usize)
                .map(|i| node.child(i))
                .collect(),
            Node::Leaf(_) => Vec::new(),
        };
        for grandchild in grandchildren {
            self.set_parent_of(grandchild, left_child)?;
        }

        let left_max = self.max_key(left_child)?;
        {
            let page = self.pager.get_page_mut(root_page_num)?;
            let mut root = InternalNode::initialize(&mut page.buffer[..]);
            root.set_root(true);
            root.set_children(&[(left_child, left_max), (right_child, 0)]);
        }
        self.set_parent_of(right_child, root_page_num)?;

        info!(left_child, right_child, left_max, "created new root");
        Ok(())
    }

    /// A fresh depth-first, pre-order walk of the tree, one line per node
    /// and key.
    pub fn dump(&mut self) -> TreeDump<'_> {
        let root = self.root_page_num;
        TreeDump {
            table: self,
            stack: vec![DumpFrame::Node {
                page_num: root,
                depth: 0,
            }],
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.pager.flush_all() {
            warn!(error = %e, "dropping table failed to flush pages to disk");
        }
    }
}

pub struct Cursor<'table> {
    table: &'table mut Table,
    page_num: u32,
    cell_num: u32,
    pub end_of_table: bool,
}

impl Cursor<'_> {
    pub fn page_num(&self) -> u32 {
        self.page_num
    }

    pub fn cell_num(&self) -> u32 {
        self.cell_num
    }

    pub fn key(&mut self) -> Result<u32, TableError> {
        let leaf = self.table.leaf(self.page_num)?;
        Ok(leaf.key(self.cell_num as usize))
    }

    pub fn value(&mut self) -> Result<Row, TableError> {
        let leaf = self.table.leaf(self.page_num)?;
        Ok(deserialize_row(leaf.value(self.cell_num as usize))?)
    }

    /// Steps to the next cell, following the leaf chain at the end of a leaf.
    pub fn advance(&mut self) -> Result<(), TableError> {
        let (num_cells, next_leaf) = {
            let leaf = self.table.leaf(self.page_num)?;
            (leaf.num_cells(), leaf.next_leaf())
        };

        self.cell_num += 1;
        if self.cell_num >= num_cells {
            if next_leaf == 0 {
                self.end_of_table = true;
            } else {
                self.page_num = next_leaf;
                self.cell_num = 0;
            }
        }
        Ok(())
    }
}

enum DumpFrame {
    Node { page_num: u32, depth: usize },
    Key { key: u32, depth: usize },
    Separator { key: u32, depth: usize },
}

/// Lazy tree walk driven by an explicit stack, so deep trees do not grow
/// the call stack.
pub struct TreeDump<'table> {
    table: &'table mut Table,
    stack: Vec<DumpFrame>,
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

impl TreeDump<'_> {
    fn visit(&mut self, frame: DumpFrame) -> Result<String, TableError> {
        match frame {
            DumpFrame::Key { key, depth } => Ok(format!("{}- {}", indent(depth), key)),
            DumpFrame::Separator { key, depth } => Ok(format!("{}- key {}", indent(depth), key)),
            DumpFrame::Node { page_num, depth } => match self.table.node(page_num)? {
                Node::Leaf(leaf) => {
                    let num_cells = leaf.num_cells();
                    for i in (0..num_cells as usize).rev() {
                        self.stack.push(DumpFrame::Key {
                            key: leaf.key(i),
                            depth: depth + 1,
                        });
                    }
                    Ok(format!("{}- leaf (size {})", indent(depth), num_cells))
                }
                Node::Internal(node) => {
                    let num_keys = node.num_keys();
                    self.stack.push(DumpFrame::Node {
                        page_num: node.right_child(),
                        depth: depth + 1,
                    });
                    for i in (0..num_keys as usize).rev() {
                        self.stack.push(DumpFrame::Separator {
                            key: node.key(i),
                            depth: depth + 1,
                        });
                        self.stack.push(DumpFrame::Node {
                            page_num: node.child(i),
                            depth: depth + 1,
                        });
                    }
                    Ok(format!("{}- internal (size {})", indent(depth), num_keys))
                }
            },
        }
    }
}

impl Iterator for TreeDump<'_> {
    type Item = Result<String, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.stack.pop()?;
        Some(self.visit(frame))
    }
}
