pub mod agents;
pub mod guard;
pub mod invocation;
pub mod message;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod tools;
