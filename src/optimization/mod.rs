pub mod bundle;
pub mod factors;

pub use bundle::*;
pub use factors::*;
