pub mod clean;
pub mod summary;
pub mod tree;

pub use clean::{clean_document, clean_dom, CleanOptions};
pub use summary::DomSummary;
pub use tree::{DocumentSnapshot, DomTree, FlatNode, NodeId, RawNode};
