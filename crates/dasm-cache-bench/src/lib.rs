//! Empty crate root; this package exists only to host `benches/`.
