#[path = "integration/fixtures.rs"]
mod fixtures;

#[path = "integration/protocol.rs"]
mod protocol;
#[path = "integration/flush.rs"]
mod flush;
#[path = "integration/relay.rs"]
mod relay;
#[path = "integration/persistence.rs"]
mod persistence;
#[path = "integration/cli.rs"]
mod cli;
