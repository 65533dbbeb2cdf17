mod builder;
mod coordinator;
mod event;
mod rounds;
mod server;

pub use builder::CoordinatorBuilder;
pub use coordinator::Coordinator;
pub(crate) use event::Event;
pub use server::serve;
