//! Prefixed, time-sortable identifiers
//!
//! Every identifier minted by this crate is a TypeID: a short prefix naming
//! what the id refers to, an underscore, then a base32 UUIDv7. Ids sort by
//! creation time, which keeps `id` a meaningful pagination tiebreaker.
//!
//! | Prefix | Used for              |
//! |--------|-----------------------|
//! | `req`  | request contexts      |
//! | `tx`   | transactions          |
//! | `usr`, `cat`, `art`, `sts`, `prf` | entity records |
//!
//! ```rust
//! use cms_kernel::ids::{new_record_id, RequestId};
//!
//! let request_id = RequestId::new();
//! assert!(request_id.as_str().starts_with("req_"));
//!
//! let category_id = new_record_id("cat");
//! assert!(category_id.starts_with("cat_"));
//! ```

use http::Request;
use mti::prelude::*;
use std::fmt;
use std::str::FromStr;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};

/// Mint a new record id with the given table prefix
pub fn new_record_id(prefix: &str) -> String {
    prefix.create_type_id::<V7>().to_string()
}

/// Error type for id parsing
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// The value is not a TypeID
    #[error("failed to parse id: {0}")]
    Parse(#[from] MagicTypeIdError),

    /// The prefix was not the expected value
    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        /// The expected prefix
        expected: String,
        /// The actual prefix found
        actual: String,
    },
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(MagicTypeId);

        impl $name {
            /// Prefix carried by every id of this kind
            pub const PREFIX: &'static str = $prefix;

            /// Mint a new id
            #[must_use]
            pub fn new() -> Self {
                Self(Self::PREFIX.create_type_id::<V7>())
            }

            /// The id as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = MagicTypeId::from_str(s)?;
                if id.prefix().as_str() != Self::PREFIX {
                    return Err(IdError::InvalidPrefix {
                        expected: Self::PREFIX.to_string(),
                        actual: id.prefix().as_str().to_string(),
                    });
                }
                Ok(Self(id))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }
    };
}

typed_id!(
    /// Identifier of one request context, propagated as `x-request-id`
    RequestId,
    "req"
);

typed_id!(
    /// Identifier of one transaction, used in logs and lifecycle errors
    TransactionId,
    "tx"
);

/// `MakeRequestId` for tower-http that mints [`RequestId`]s
///
/// ```rust,ignore
/// use cms_kernel::ids::MakeTypedRequestId;
/// use tower_http::request_id::SetRequestIdLayer;
///
/// let layer = SetRequestIdLayer::x_request_id(MakeTypedRequestId);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let header_value = http::HeaderValue::from_str(RequestId::new().as_str()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}
