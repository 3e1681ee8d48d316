//! Concrete [`ClientWrapper`](crate::cloudllm::client_wrapper::ClientWrapper) implementations.

pub mod http;
