//! Concrete port implementations (C12): the Docker daemon backend.

mod docker;

pub use docker::DockerDaemonBackend;
