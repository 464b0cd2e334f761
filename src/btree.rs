use thiserror::Error;

use crate::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Internal,
}

impl NodeType {
    fn tag(self) -> u8 {
        match self {
            NodeType::Leaf => 0,
            NodeType::Internal => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, NodeError> {
        match tag {
            0 => Ok(NodeType::Leaf),
            1 => Ok(NodeType::Internal),
            _ => Err(NodeError::UnknownNodeType(tag)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("Corrupt page: unknown node type tag {0}")]
    UnknownNodeType(u8),
    #[error("Corrupt page: expected {expected:?} node, found {found:?}")]
    WrongNodeType { expected: NodeType, found: NodeType },
}

fn read_u32(buffer: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buffer[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn write_u32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn node_type(buffer: &[u8]) -> Result<NodeType, NodeError> {
    NodeType::from_tag(buffer[NODE_TYPE_OFFSET])
}

fn expect_type(buffer: &[u8], expected: NodeType) -> Result<(), NodeError> {
    let found = node_type(buffer)?;
    if found == expected {
        Ok(())
    } else {
        Err(NodeError::WrongNodeType { expected, found })
    }
}

fn set_node_type(buffer: &mut [u8], node_type: NodeType) {
    buffer[NODE_TYPE_OFFSET] = node_type.tag();
}

pub fn is_root(buffer: &[u8]) -> bool {
    buffer[IS_ROOT_OFFSET] != 0
}

pub fn set_root(buffer: &mut [u8], is_root: bool) {
    buffer[IS_ROOT_OFFSET] = is_root as u8;
}

pub fn parent(buffer: &[u8]) -> u32 {
    read_u32(buffer, PARENT_POINTER_OFFSET)
}

pub fn set_parent(buffer: &mut [u8], parent: u32) {
    write_u32(buffer, PARENT_POINTER_OFFSET, parent)
}

/// A page viewed through its node-type tag.
pub enum Node<B> {
    Leaf(LeafNode<B>),
    Internal(InternalNode<B>),
}

impl<B: AsRef<[u8]>> Node<B> {
    pub fn new(buffer: B) -> Result<Self, NodeError> {
        match node_type(buffer.as_ref())? {
            NodeType::Leaf => Ok(Node::Leaf(LeafNode { buffer })),
            NodeType::Internal => Ok(Node::Internal(InternalNode { buffer })),
        }
    }
}

pub struct LeafNode<B> {
    buffer: B,
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    pub fn new(buffer: B) -> Result<Self, NodeError> {
        expect_type(buffer.as_ref(), NodeType::Leaf)?;
        Ok(LeafNode { buffer })
    }

    pub fn is_root(&self) -> bool {
        is_root(self.buffer.as_ref())
    }

    pub fn parent(&self) -> u32 {
        parent(self.buffer.as_ref())
    }

    pub fn num_cells(&self) -> u32 {
        read_u32(self.buffer.as_ref(), LEAF_NODE_NUM_CELLS_OFFSET)
    }

    /// Page number of the next leaf to the right, 0 for the last leaf.
    pub fn next_leaf(&self) -> u32 {
        read_u32(self.buffer.as_ref(), LEAF_NODE_NEXT_LEAF_OFFSET)
    }

    pub fn cell(&self, cell_num: usize) -> &[u8] {
        let start = LEAF_NODE_HEADER_SIZE + cell_num * LEAF_NODE_CELL_SIZE;
        &self.buffer.as_ref()[start..start + LEAF_NODE_CELL_SIZE]
    }

    pub fn key(&self, cell_num: usize) -> u32 {
        read_u32(self.cell(cell_num), LEAF_NODE_KEY_OFFSET)
    }

    pub fn value(&self, cell_num: usize) -> &[u8] {
        &self.cell(cell_num)[LEAF_NODE_VALUE_OFFSET..]
    }

    /// Largest key in the leaf, `None` when it is empty.
    pub fn max_key(&self) -> Option<u32> {
        match self.num_cells() {
            0 => None,
            n => Some(self.key(n as usize - 1)),
        }
    }

    /// Binary search for `key`: `Ok(index)` when present, otherwise
    /// `Err(index)` where it would be inserted.
    pub fn find(&self, key: u32) -> Result<usize, usize> {
        let mut min_index = 0usize;
        let mut one_past_max_index = self.num_cells() as usize;
        while one_past_max_index != min_index {
            let index = (min_index + one_past_max_index) / 2;
            let key_at_index = self.key(index);
            if key == key_at_index {
                return Ok(index);
            }
            if key < key_at_index {
                one_past_max_index = index;
            } else {
                min_index = index + 1;
            }
        }
        Err(min_index)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    /// Formats the page as an empty, non-root leaf.
    pub fn initialize(mut buffer: B) -> Self {
        let buf = buffer.as_mut();
        set_node_type(buf, NodeType::Leaf);
        set_root(buf, false);
        write_u32(buf, LEAF_NODE_NUM_CELLS_OFFSET, 0);
        write_u32(buf, LEAF_NODE_NEXT_LEAF_OFFSET, 0);
        LeafNode { buffer }
    }

    pub fn set_root(&mut self, is_root: bool) {
        set_root(self.buffer.as_mut(), is_root)
    }

    pub fn set_parent(&mut self, parent: u32) {
        set_parent(self.buffer.as_mut(), parent)
    }

    pub fn set_num_cells(&mut self, num_cells: u32) {
        write_u32(self.buffer.as_mut(), LEAF_NODE_NUM_CELLS_OFFSET, num_cells)
    }

    pub fn set_next_leaf(&mut self, next_leaf: u32) {
        write_u32(self.buffer.as_mut(), LEAF_NODE_NEXT_LEAF_OFFSET, next_leaf)
    }

    pub fn cell_mut(&mut self, cell_num: usize) -> &mut [u8] {
        let start = LEAF_NODE_HEADER_SIZE + cell_num * LEAF_NODE_CELL_SIZE;
        &mut self.buffer.as_mut()[start..start + LEAF_NODE_CELL_SIZE]
    }

    /// Writes a full cell (key followed by a serialized row).
    pub fn write_cell(&mut self, cell_num: usize, key: u32, value: &[u8; ROW_SIZE]) {
        let cell = self.cell_mut(cell_num);
        write_u32(cell, LEAF_NODE_KEY_OFFSET, key);
        cell[LEAF_NODE_VALUE_OFFSET..].copy_from_slice(value);
    }

    /// Opens a gap at `cell_num` by moving the cells at and after it one slot
    /// to the right. The cell count is left untouched.
    pub fn shift_cells_right(&mut self, cell_num: usize) {
        let num_cells = self.num_cells() as usize;
        if cell_num >= num_cells {
            return;
        }
        let start = LEAF_NODE_HEADER_SIZE + cell_num * LEAF_NODE_CELL_SIZE;
        let end = LEAF_NODE_HEADER_SIZE + num_cells * LEAF_NODE_CELL_SIZE;
        self.buffer
            .as_mut()
            .copy_within(start..end, start + LEAF_NODE_CELL_SIZE);
    }
}

pub struct InternalNode<B> {
    buffer: B,
}

impl<B: AsRef<[u8]>> InternalNode<B> {
    pub fn new(buffer: B) -> Result<Self, NodeError> {
        expect_type(buffer.as_ref(), NodeType::Internal)?;
        Ok(InternalNode { buffer })
    }

    pub fn is_root(&self) -> bool {
        is_root(self.buffer.as_ref())
    }

    pub fn parent(&self) -> u32 {
        parent(self.buffer.as_ref())
    }

    pub fn num_keys(&self) -> u32 {
        read_u32(self.buffer.as_ref(), INTERNAL_NODE_NUM_KEYS_OFFSET)
    }

    pub fn right_child(&self) -> u32 {
        read_u32(self.buffer.as_ref(), INTERNAL_NODE_RIGHT_CHILD_OFFSET)
    }

    fn cell_offset(cell_num: usize) -> usize {
        INTERNAL_NODE_HEADER_SIZE + cell_num * INTERNAL_NODE_CELL_SIZE
    }

    /// Child pointer for `child_num`; `num_keys()` addresses the right child.
    pub fn child(&self, child_num: usize) -> u32 {
        if child_num == self.num_keys() as usize {
            self.right_child()
        } else {
            read_u32(self.buffer.as_ref(), Self::cell_offset(child_num))
        }
    }

    pub fn key(&self, key_num: usize) -> u32 {
        read_u32(
            self.buffer.as_ref(),
            Self::cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE,
        )
    }

    /// Index of the child that covers `key`: the first separator that is
    /// `>= key`, or `num_keys()` for the right child.
    pub fn find_child(&self, key: u32) -> usize {
        let mut min_index = 0usize;
        let mut max_index = self.num_keys() as usize;
        while min_index != max_index {
            let index = (min_index + max_index) / 2;
            if self.key(index) >= key {
                max_index = index;
            } else {
                min_index = index + 1;
            }
        }
        min_index
    }

    /// Position of the child pointer equal to `page_num`, if this node owns it.
    pub fn child_index(&self, page_num: u32) -> Option<usize> {
        (0..=self.num_keys() as usize).find(|i| self.child(*i) == page_num)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalNode<B> {
    /// Formats the page as an empty, non-root internal node.
    pub fn initialize(mut buffer: B) -> Self {
        let buf = buffer.as_mut();
        set_node_type(buf, NodeType::Internal);
        set_root(buf, false);
        write_u32(buf, INTERNAL_NODE_NUM_KEYS_OFFSET, 0);
        write_u32(buf, INTERNAL_NODE_RIGHT_CHILD_OFFSET, 0);
        InternalNode { buffer }
    }

    pub fn set_root(&mut self, is_root: bool) {
        set_root(self.buffer.as_mut(), is_root)
    }

    pub fn set_parent(&mut self, parent: u32) {
        set_parent(self.buffer.as_mut(), parent)
    }

    pub fn set_num_keys(&mut self, num_keys: u32) {
        write_u32(self.buffer.as_mut(), INTERNAL_NODE_NUM_KEYS_OFFSET, num_keys)
    }

    pub fn set_right_child(&mut self, page_num: u32) {
        write_u32(self.buffer.as_mut(), INTERNAL_NODE_RIGHT_CHILD_OFFSET, page_num)
    }

    pub fn set_cell(&mut self, cell_num: usize, child: u32, key: u32) {
        let offset = Self::cell_offset(cell_num);
        let buf = self.buffer.as_mut();
        write_u32(buf, offset, child);
        write_u32(buf, offset + INTERNAL_NODE_CHILD_SIZE, key);
    }

    pub fn set_key(&mut self, key_num: usize, key: u32) {
        let offset = Self::cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE;
        write_u32(self.buffer.as_mut(), offset, key)
    }

    /// Rewrites the node from an ordered list of `(child, max key)` pairs.
    /// The last pair becomes the right child.
    pub fn set_children(&mut self, entries: &[(u32, u32)]) {
        let (last, cells) = match entries.split_last() {
            Some(split) => split,
            None => {
                self.set_num_keys(0);
                return;
            }
        };
        for (i, (child, key)) in cells.iter().enumerate() {
            self.set_cell(i, *child, *key);
        }
        self.set_num_keys(cells.len() as u32);
        self.set_right_child(last.0);
    }

    /// Moves the cells at and after `cell_num` one slot to the right.
    pub fn shift_cells_right(&mut self, cell_num: usize) {
        let num_keys = self.num_keys() as usize;
        if cell_num >= num_keys {
            return;
        }
        let start = Self::cell_offset(cell_num);
        let end = Self::cell_offset(num_keys);
        self.buffer
            .as_mut()
            .copy_within(start..end, start + INTERNAL_NODE_CELL_SIZE);
    }
}

/// Reads the key stored in a raw leaf cell.
pub fn cell_key(cell: &[u8]) -> u32 {
    read_u32(cell, LEAF_NODE_KEY_OFFSET)
}
