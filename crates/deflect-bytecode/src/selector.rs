//! Call-site selectors
//!
//! A [`CallSelector`] decides which call targets an instrumentation pass
//! redirects and which intercepted identities a registered provider claims.
//! The same selector type serves both sides so a registration can mirror the
//! instrumentation that produced the hook sites.

use crate::identity::{MemberKind, MethodIdentity};
use std::fmt;
use std::sync::Arc;

/// Predicate over method identities
pub type IdentityPredicate = Arc<dyn Fn(&MethodIdentity) -> bool + Send + Sync>;

/// Selector over call targets
#[derive(Clone)]
pub enum CallSelector {
    /// Exactly one member, by full structural identity
    Exact(MethodIdentity),
    /// Every call whose target is declared by the named type
    DeclaringType(String),
    /// Every call to the named member of the named type, any kind or shape
    Member {
        /// Declaring type name
        declaring_type: String,
        /// Member name
        member_name: String,
    },
    /// Arbitrary predicate over the target identity
    Predicate(IdentityPredicate),
}

impl CallSelector {
    /// Select a specific member by structural identity
    pub fn exact(identity: MethodIdentity) -> Self {
        CallSelector::Exact(identity)
    }

    /// Select every constructor call on the named type
    pub fn constructors_of(declaring_type: impl Into<String>) -> Self {
        let declaring_type = declaring_type.into();
        CallSelector::Predicate(Arc::new(move |id: &MethodIdentity| {
            id.kind == MemberKind::Constructor && id.declaring_type == declaring_type
        }))
    }

    /// Select every call to members declared by the named type
    pub fn declaring_type(name: impl Into<String>) -> Self {
        CallSelector::DeclaringType(name.into())
    }

    /// Select every call to the named member of the named type
    pub fn member(declaring_type: impl Into<String>, member_name: impl Into<String>) -> Self {
        CallSelector::Member {
            declaring_type: declaring_type.into(),
            member_name: member_name.into(),
        }
    }

    /// Select by arbitrary predicate
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&MethodIdentity) -> bool + Send + Sync + 'static,
    {
        CallSelector::Predicate(Arc::new(predicate))
    }

    /// Whether this selector matches the given target identity
    pub fn matches(&self, identity: &MethodIdentity) -> bool {
        match self {
            CallSelector::Exact(expected) => expected == identity,
            CallSelector::DeclaringType(name) => identity.declaring_type == *name,
            CallSelector::Member {
                declaring_type,
                member_name,
            } => {
                identity.declaring_type == *declaring_type && identity.member_name == *member_name
            }
            CallSelector::Predicate(pred) => pred(identity),
        }
    }

    /// The single identity this selector is known to match, if any.
    ///
    /// Registration-time signature validation needs one satisfying identity
    /// to check a typed handler against; only exact selectors can supply it.
    pub fn exact_identity(&self) -> Option<&MethodIdentity> {
        match self {
            CallSelector::Exact(identity) => Some(identity),
            _ => None,
        }
    }
}

impl fmt::Debug for CallSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallSelector::Exact(identity) => {
                f.debug_tuple("Exact").field(&identity.display_name()).finish()
            }
            CallSelector::DeclaringType(name) => {
                f.debug_tuple("DeclaringType").field(name).finish()
            }
            CallSelector::Member {
                declaring_type,
                member_name,
            } => f
                .debug_struct("Member")
                .field("declaring_type", declaring_type)
                .field("member_name", member_name)
                .finish(),
            CallSelector::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
