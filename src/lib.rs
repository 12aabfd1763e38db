pub mod bench_support;

pub use shipment_quota;
