pub mod factory;

pub use factory::AsyncConnectionFactory;
pub use tokio_util::sync::CancellationToken;
