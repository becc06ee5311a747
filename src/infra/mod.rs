//! 基础设施模块
//!
//! 封装外部依赖（子进程执行、ssh/scp、florago HTTP client）

pub mod command;
pub mod control_plane;
pub mod remote;

pub use command::CommandRunner;
pub use control_plane::{ControlPlane, ControlPlaneConnector, HttpConnector, HttpControlPlane};
pub use remote::{RemoteOutput, RemoteTransport, SshTransport};
