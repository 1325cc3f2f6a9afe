//! Session registry.
//!
//! The user-visible unit of this service is the session: an agent's isolated
//! browser context plus its open pages, bound for life to the worker where it
//! was created. The registry owns the in-memory session map and the protocol
//! clients (strictly keyed by port); sessions hold non-owning references to
//! their client. Destruction never dismantles a client: clients outlive
//! individual sessions and close only at registry shutdown.

pub mod accessibility;
pub mod error;
pub mod registry;
pub mod session;

mod operations;

pub use accessibility::{AxNode, AxTree};
pub use error::RegistryError;
pub use registry::{RegistryConfig, SessionRegistry};
pub use session::{Session, SessionSnapshot, SessionStatus};
