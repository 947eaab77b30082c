pub mod forwarder;
pub mod gateway;
pub mod registry;
pub mod request;
pub mod response;
pub mod router;
