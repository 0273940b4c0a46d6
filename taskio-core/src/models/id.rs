use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Mint a fresh 12-character nanoid, the ID scheme every entity shares.
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Stamps out a newtype over the shared nanoid scheme. The wrappers exist
/// so a task ID cannot be passed where a user ID is expected; serde sees
/// them as plain strings.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

entity_id! {
    /// Account-service user ID; the gateway treats it as opaque.
    UserId
}

entity_id! {
    /// Project ID, the scoping unit for membership and cache keys.
    ProjectId
}

entity_id! {
    /// Sprint ID.
    SprintId
}

entity_id! {
    /// Epic ID.
    EpicId
}

entity_id! {
    /// Task ID.
    TaskId
}

entity_id! {
    /// One open client connection. A user holds one per device or tab, and
    /// a reconnect always mints a new one.
    SessionId
}
