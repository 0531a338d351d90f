mod compose;
mod inspect;
mod resolve;

pub use compose::cmd_compose;
pub use inspect::cmd_inspect;
pub use resolve::cmd_resolve;
