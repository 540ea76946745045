//! Storage workers: the worker-side handler, the thread that runs it, and
//! the main-side handle used to talk to it.

pub mod channel;
pub mod environment;
pub mod handler;
pub mod thread;

pub use channel::WorkerHandle;
pub use handler::MessageHandler;
