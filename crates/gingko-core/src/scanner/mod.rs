mod walk;

pub use walk::{build_stamp_map, source_stamp};
