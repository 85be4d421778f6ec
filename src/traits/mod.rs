pub mod callbacks;

pub use callbacks::{EventRoute, VendorCallbacks, VendorOpResult};

#[cfg(test)]
pub use callbacks::MockVendorCallbacks;
