pub mod build_docs;
pub mod build_index;
pub mod query;
pub mod status;
