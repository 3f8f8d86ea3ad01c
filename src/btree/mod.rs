//! btree — B+-дерево: один узел на страницу, упорядоченные ключи
//! фиксированной ширины, ссылки на соседние листья для range-сканов.

pub mod key;
pub mod node;
pub mod tree;

pub use key::{
    composite_key, doc_id_from_composite, doc_id_from_primary, encode_field_key, key_width,
    max_field_key, min_non_null_key, null_field_key, prefix_bounds, primary_key,
};
pub use node::LeafValue;
pub use tree::BTree;
