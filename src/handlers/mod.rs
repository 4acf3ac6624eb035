pub mod container_handlers;
pub mod health_handlers;
pub mod object_handlers;
