//! Session and role resolution for guarded routes

pub mod cache;
pub mod choose_role;
pub mod context;
pub mod identity;
pub mod navigation;
pub mod profile_store;
pub mod resolver;

pub use cache::{FillTicket, SessionCache};
pub use choose_role::{ChooseRoleError, RoleAssignment};
pub use context::SessionContext;
pub use identity::{IdentityError, IdentityProvider, SessionEvent};
pub use navigation::{NavigationOutcome, NavigationTicket, Navigator};
pub use profile_store::{ProfileStore, StoreError};
pub use resolver::{Guard, ResolveError, ResolverConfig, SessionResolver, Verdict};
