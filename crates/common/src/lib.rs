// switchboard-common: shared wire types for the Switchboard workspace

pub mod protocol;
pub mod types;
