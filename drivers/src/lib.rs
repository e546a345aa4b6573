pub mod cli_cluster;
pub mod cli_sandbox;
pub mod fakes;

pub use cli_cluster::CliClusterDriver;
pub use cli_sandbox::CliSandboxDriver;
pub use fakes::{FakeClusterDriver, FakeSandboxDriver};
