//! Causal graph model: the read-mostly view the chunker traverses.
//!
//! Rule firings produce [`Instantiation`]s; each owns the ground
//! [`Condition`]s it matched and the [`Preference`]s it generated. Preferences
//! support working-memory elements ([`Wme`]s) hanging off identifiers, and a
//! condition that matched a WME records the preference behind it. Following
//! those links backwards from a result is what backtracing does.
//!
//! Everything lives in one arena ([`CausalGraph`]) and is referenced through
//! small integer handles, so cycles (mutual support) are harmless: traversals
//! use transitive-closure stamps, never ownership.

pub mod condition;
pub mod graph;

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

pub use condition::{Backtrace, CondRef, Condition, Pattern, Relation, RelationalTest, Term, Test};
pub use graph::{
    CausalGraph, IdentifierInfo, Instantiation, InstantiationSpec, Preference, PreferenceSpec,
    Slot, Wme,
};

/// Depth of a goal in the goal stack. The top state is level 1; substates are deeper.
pub type GoalLevel = u32;

/// Level given to instantiations that matched no goal (attribute impasses).
pub const NO_GOAL_LEVEL: GoalLevel = GoalLevel::MAX;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Create a handle from a raw `u64`. Returns `None` for zero.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map($name)
            }

            /// Get the underlying `u64` value.
            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle of one rule firing.
    InstantiationId,
    "i"
);
handle!(
    /// Handle of one preference.
    PreferenceId,
    "p"
);
handle!(
    /// Handle of one working-memory element.
    WmeId,
    "w"
);
handle!(
    /// Generalization key for the role a ground value plays in a derivation.
    ///
    /// Two occurrences of the same value may carry different identities; two
    /// identities may later be unified when backtracing shows they denote the
    /// same value.
    IdentityId,
    "#"
);
handle!(
    /// Group of preferences that are clones of one logical preference.
    CloneGroupId,
    "g"
);

/// Kind of a preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferenceKind {
    Acceptable,
    Require,
    Reject,
    Prohibit,
    Reconsider,
    Best,
    Worst,
    UnaryIndifferent,
    NumericIndifferent,
    Better,
    Worse,
    BinaryIndifferent,
}

impl PreferenceKind {
    /// Binary preferences compare the value against a referent.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            PreferenceKind::Better | PreferenceKind::Worse | PreferenceKind::BinaryIndifferent
        )
    }

    pub fn is_unary(self) -> bool {
        !self.is_binary()
    }
}

impl std::fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PreferenceKind::Acceptable => "+",
            PreferenceKind::Require => "!",
            PreferenceKind::Reject => "-",
            PreferenceKind::Prohibit => "~",
            PreferenceKind::Reconsider => "@",
            PreferenceKind::Best => ">",
            PreferenceKind::Worst => "<",
            PreferenceKind::UnaryIndifferent => "=",
            PreferenceKind::NumericIndifferent => "=N",
            PreferenceKind::Better => ">R",
            PreferenceKind::Worse => "<R",
            PreferenceKind::BinaryIndifferent => "=R",
        };
        write!(f, "{s}")
    }
}

/// One value per field of a preference or action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slots<T> {
    pub id: T,
    pub attr: T,
    pub value: T,
    pub referent: T,
}
