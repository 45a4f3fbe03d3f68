// Resource graph - declared resources, deferred values, dependency order
mod output;
mod prop;
mod resource;
mod stack;

pub use output::{Output, Template};
pub use prop::Prop;
pub use resource::{Resource, ResourceKind, ResourceRef};
pub use stack::Stack;
