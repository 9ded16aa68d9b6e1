use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares an opaque string id. Engine-minted ids are `<prefix>_<uuidv7>`,
/// so they sort by creation time; ids handed over by a provider or a caller
/// are kept verbatim.
macro_rules! branded_id {
    ($(#[$doc:meta])* $name:ident => $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7()))
            }

            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether this id was minted by [`Self::new`] rather than received.
            pub fn is_minted(&self) -> bool {
                self.0
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|uuid| Uuid::parse_str(uuid).is_ok())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::from_raw(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

branded_id!(
    /// One end-to-end processing of a user turn.
    RunId => "run"
);
branded_id!(AgentId => "agent");
branded_id!(
    /// Usually supplied by the model; minted only when a stream omits it.
    ToolCallId => "call"
);
branded_id!(PlanId => "plan");
branded_id!(TaskId => "task");
branded_id!(
    /// A maximal run of content or reasoning text. Never reused.
    BlockId => "blk"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_carry_prefix() {
        assert!(RunId::new().as_str().starts_with("run_"));
        assert!(ToolCallId::new().as_str().starts_with("call_"));
        assert!(PlanId::new().as_str().starts_with("plan_"));
        assert!(TaskId::new().as_str().starts_with("task_"));
        assert!(BlockId::new().as_str().starts_with("blk_"));
    }

    #[test]
    fn provider_ids_kept_verbatim() {
        let id = ToolCallId::from("toolu_01A");
        assert_eq!(id.as_str(), "toolu_01A");
        assert!(!id.is_minted());
        assert!(ToolCallId::new().is_minted());
        assert!(!ToolCallId::from_raw("call_not-a-uuid").is_minted());
    }

    #[test]
    fn serializes_transparently() {
        let id = ToolCallId::from_raw("c1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""c1""#);
        let back: ToolCallId = serde_json::from_str(r#""c1""#).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn minted_ids_sort_by_creation() {
        let ids: Vec<BlockId> = (0..100).map(|_| BlockId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
