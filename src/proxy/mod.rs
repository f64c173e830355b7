pub mod classify;
pub mod dispatcher;
pub mod endpoints;
pub mod retry;
pub mod upstream;
