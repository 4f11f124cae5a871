// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory dictionaries (`bytes -> u32`) used for term, type,
//! docid, attribute and user name lookup caches during bulk
//! ingestion.

mod var_size_node_tree;

pub use var_size_node_tree::{Iter, NodeData, VarSizeNodeTree};
