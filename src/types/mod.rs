mod record;
pub use record::*;

mod change;
pub use change::*;
