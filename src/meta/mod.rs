// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Document metadata: typed fixed-width records with named columns,
//! persisted in 256-record blocks and served through a shared
//! snapshot cache.

mod block;
mod cache;
mod descr;
mod element;
mod map;
mod record;

pub use block::MetaDataBlock;
pub use cache::{MetaDataBlockCache, MetaDataSnapshot};
pub use descr::{MetaDataDescription, TranslationMap};
pub use element::{MetaDataElement, MetaDataType};
pub use map::MetaDataMap;
pub use record::{clear_record, get_value, set_value, translate_record};
