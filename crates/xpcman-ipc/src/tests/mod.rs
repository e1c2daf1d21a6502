mod behaviour;
mod connection;
mod support;
