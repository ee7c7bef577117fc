//! Role names and permission strings carried in access tokens.

pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const MODERATOR: &str = "moderator";
    pub const CUSTOMER: &str = "customer";
}

/// Common permission string constants for compile-time safety
pub mod consts {
    /// Lets staff cancel orders that already left `pending`.
    pub const ORDERS_FORCE_CANCEL: &str = "orders:force_cancel";
}
