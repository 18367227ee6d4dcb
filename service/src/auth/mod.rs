//! Authentication and access control.
//!
//! Sessions are owned by the identity service; this crate only resolves a
//! bearer token to a [`Principal`] and checks what that principal may see.
//!
//! - [`BearerToken`]: `Authorization: Bearer <token>`
//! - [`SessionUser`]: any authenticated principal
//! - [`RequireStaff`]: door scanners and box office
//!
//! Redemption codes are bearer credentials: only a ticket's owner is ever
//! shown one outside of minting.

pub mod middleware;
pub mod sessions;

pub use middleware::{BearerToken, RequireStaff, SessionUser};
pub use sessions::{
    HttpSessionResolver, Principal, Role, SessionError, SessionResolver, StaticSessionResolver,
};
