//! page — страничные форматы: slotted-страницы документов, overflow-цепочки,
//! контрольные суммы.

pub mod checksum;
pub mod ovf;
pub mod slotted;

pub use checksum::{page_update_checksum, page_verify_checksum, slotted_checksum};
pub use ovf::{ovf_chunk_capacity, ovf_chunk_read, ovf_chunk_write, ovf_pages_needed};
pub use slotted::{
    slotted_add, slotted_compact, slotted_contiguous_free, slotted_delete, slotted_get,
    slotted_header_read, slotted_header_write, slotted_init, slotted_logical_free,
    slotted_needs_compaction, slotted_next_page, slotted_set_next_page, slotted_update_in_place,
    SlotEntry, SlotView, SlottedHeader,
};
